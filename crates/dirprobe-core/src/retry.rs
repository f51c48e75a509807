//! Retry policy and timeout defaults for directory connections.

use std::time::Duration;

/// Default TCP/TLS dial timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default per-operation timeout in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Default maximum number of attempts for a retryable operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff step in milliseconds.
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 500;

/// Bounded retry policy with linear backoff.
///
/// Attempt `n` (1-based) that fails with a retryable error waits `n * step` before attempt
/// `n + 1`. Only transient network failures are ever retried; callers decide that with
/// [`crate::Error::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Linear backoff step.
    pub backoff_step: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: Duration::from_millis(DEFAULT_BACKOFF_STEP_MS),
        }
    }

    /// Create a retry policy that makes a single attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_step: Duration::from_millis(0),
        }
    }

    /// Set the maximum number of attempts (at least one attempt is always made).
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Set the backoff step.
    #[must_use]
    pub const fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }

    /// Returns true if another attempt is allowed after `attempt` failed.
    #[must_use]
    pub const fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_new() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            policy.backoff_step,
            Duration::from_millis(DEFAULT_BACKOFF_STEP_MS)
        );
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_allows_another() {
        let policy = RetryPolicy::new();
        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.allows_another(1));
        assert_eq!(policy.delay_after_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new()
            .with_max_attempts(0)
            .with_backoff_step(Duration::from_millis(10));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(20));
    }
}
