//! Retry and timeout policies.

use std::{collections::HashMap, time::Duration};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default per-attempt deadline for read and query operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-attempt deadline for append-style writes.
pub const APPEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Operation that appends to the remote insights memo.
pub const APPEND_OPERATION: &str = "append_insight";

/// Bounded retry with a fixed delay.
///
/// The delay does not grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before every retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retries() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total attempts the policy allows.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt_number`, or `None` once
    /// the budget is spent.
    #[must_use]
    pub const fn delay_after(&self, attempt_number: u32) -> Option<Duration> {
        if attempt_number > self.max_retries {
            None
        } else {
            Some(self.base_delay)
        }
    }
}

/// Per-operation deadlines with a default fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    default: Duration,
    per_operation: HashMap<String, Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT).with_operation(APPEND_OPERATION, APPEND_TIMEOUT)
    }
}

impl TimeoutPolicy {
    /// Create a policy with only a default deadline.
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_operation: HashMap::new(),
        }
    }

    /// Set the deadline for one operation.
    #[must_use]
    pub fn with_operation(mut self, name: impl Into<String>, deadline: Duration) -> Self {
        self.per_operation.insert(name.into(), deadline);
        self
    }

    /// Replace the default deadline.
    #[must_use]
    pub fn with_default(mut self, default: Duration) -> Self {
        self.default = default;
        self
    }

    /// Deadline for `name`, falling back to the default.
    #[must_use]
    pub fn for_operation(&self, name: &str) -> Duration {
        self.per_operation.get(name).copied().unwrap_or(self.default)
    }

    /// Default deadline.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_until_budget_spent() {
        let policy = RetryPolicy::new(2, Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(RetryPolicy::no_retries().delay_after(1), None);
    }

    #[test]
    fn test_write_and_read_deadlines_are_independent() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.for_operation(APPEND_OPERATION), APPEND_TIMEOUT);
        assert_eq!(policy.for_operation("read_query"), DEFAULT_TIMEOUT);

        let policy = policy
            .with_default(Duration::from_secs(90))
            .with_operation(APPEND_OPERATION, Duration::from_secs(1));
        assert_eq!(policy.for_operation("read_query"), Duration::from_secs(90));
        assert_eq!(policy.for_operation(APPEND_OPERATION), Duration::from_secs(1));
    }
}
