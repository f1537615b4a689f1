//! User record model and batch validation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single user record as submitted by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub email: String,
    pub age: i32,
}

/// One violated rule on one field of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Position of the record inside the submitted batch
    pub index: usize,
    /// Field name, or `$` when the element itself is malformed
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(index: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}].{} {}", self.index, self.field, self.message)
    }
}

/// Every rule violated by a batch, not just the first one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// Whether a violation was recorded for the given record and field
    pub fn has(&self, index: usize, field: &str) -> bool {
        self.violations
            .iter()
            .any(|v| v.index == index && v.field == field)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} invalid field(s)", self.violations.len())?;
        for (i, violation) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors produced while turning a raw upload into a batch of records
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("expected a JSON array of user records")]
    NotAnArray,

    #[error("at least one user record is required")]
    Empty,

    #[error("{0}")]
    Validation(#[from] ValidationError),
}

fn name_problem(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        Some("must not be empty")
    } else {
        None
    }
}

fn email_problem(email: &str) -> Option<&'static str> {
    if email.contains('@') {
        None
    } else {
        Some("must contain '@'")
    }
}

fn age_problem(age: i64) -> Option<&'static str> {
    if age < 0 {
        Some("must be a non-negative integer")
    } else if age > i64::from(i32::MAX) {
        Some("is out of range")
    } else {
        None
    }
}

impl UserRecord {
    pub fn new(name: impl Into<String>, email: impl Into<String>, age: i32) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            age,
        }
    }

    /// Re-check an already typed record, e.g. one read back from the staging store
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if let Some(message) = name_problem(&self.name) {
            violations.push(FieldViolation::new(0, "name", message));
        }
        if let Some(message) = email_problem(&self.email) {
            violations.push(FieldViolation::new(0, "email", message));
        }
        if let Some(message) = age_problem(i64::from(self.age)) {
            violations.push(FieldViolation::new(0, "age", message));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    /// Build a record from an untyped JSON element, appending every violation found
    fn from_value(index: usize, value: &Value, violations: &mut Vec<FieldViolation>) -> Option<Self> {
        let Some(object) = value.as_object() else {
            violations.push(FieldViolation::new(index, "$", "must be a JSON object"));
            return None;
        };

        let name = string_field(object, index, "name", name_problem, violations);
        let email = string_field(object, index, "email", email_problem, violations);
        let age = age_field(object, index, violations);

        Some(Self {
            name: name?,
            email: email?,
            age: age?,
        })
    }
}

fn string_field(
    object: &Map<String, Value>,
    index: usize,
    field: &str,
    check: fn(&str) -> Option<&'static str>,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match object.get(field) {
        Some(Value::String(s)) => match check(s) {
            Some(message) => {
                violations.push(FieldViolation::new(index, field, message));
                None
            },
            None => Some(s.clone()),
        },
        None | Some(Value::Null) => {
            violations.push(FieldViolation::new(index, field, "is required"));
            None
        },
        Some(_) => {
            violations.push(FieldViolation::new(index, field, "must be a string"));
            None
        },
    }
}

fn age_field(
    object: &Map<String, Value>,
    index: usize,
    violations: &mut Vec<FieldViolation>,
) -> Option<i32> {
    let message = match object.get("age") {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(age) => match age_problem(age) {
                Some(message) => message,
                None => return i32::try_from(age).ok(),
            },
            None if n.as_u64().is_some() => "is out of range",
            None => "must be an integer",
        },
        None | Some(Value::Null) => "is required",
        Some(_) => "must be an integer",
    };

    violations.push(FieldViolation::new(index, "age", message));
    None
}

/// Parse and validate a raw upload as a non-empty JSON array of user records
///
/// Validation covers every element; the returned [`ValidationError`] lists all
/// violated fields across the batch.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<UserRecord>, BatchError> {
    let value: Value = serde_json::from_slice(bytes).map_err(BatchError::InvalidJson)?;

    let Value::Array(elements) = value else {
        return Err(BatchError::NotAnArray);
    };

    if elements.is_empty() {
        return Err(BatchError::Empty);
    }

    let mut violations = Vec::new();
    let records: Vec<UserRecord> = elements
        .iter()
        .enumerate()
        .filter_map(|(index, element)| UserRecord::from_value(index, element, &mut violations))
        .collect();

    if !violations.is_empty() {
        return Err(ValidationError { violations }.into());
    }

    Ok(records)
}
