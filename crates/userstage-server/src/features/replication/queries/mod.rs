//! Replication queries

pub mod list_dead_letters;

pub use list_dead_letters::{ListDeadLettersError, ListDeadLettersQuery, ListDeadLettersResponse};
