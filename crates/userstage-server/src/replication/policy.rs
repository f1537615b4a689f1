use std::time::Duration;

/// Bounded exponential backoff for failed deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries allowed before a message is dead-lettered
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before redelivering a message that just failed its `attempt`-th delivery
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    /// Whether a failure on this delivery is the last one allowed
    pub fn should_dead_letter(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Whether the message was delivered more often than allowed without ever
    /// being settled, e.g. because workers kept crashing mid-processing
    pub fn exceeded(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}
