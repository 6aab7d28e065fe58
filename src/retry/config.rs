use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CollabError;

/// Predicate deciding whether a classified error should be retried
pub type RetryCondition = Arc<dyn Fn(&CollabError) -> bool + Send + Sync>;

/// Retry budget and backoff for one operation.
///
/// The delay before retry attempt `k` (1-based) is `base_delay * 2^(k-1)`.
#[derive(Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    retry_condition: RetryCondition,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    /// Retry retryable errors up to `max_retries` times
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            retry_condition: Arc::new(|err: &CollabError| err.retryable),
        }
    }

    /// Single attempt, never retried
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Replace the default `error.retryable` condition
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&CollabError) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    pub fn should_retry(&self, err: &CollabError) -> bool {
        (self.retry_condition)(err)
    }

    /// Delay before retry attempt `attempt` (1-based); zero for attempt 0
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^30 times any sane base delay is already days
        const MAX_EXP: u32 = 30;
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1).min(MAX_EXP);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_delays() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_saturates() {
        let config = RetryConfig::new(100, Duration::from_secs(u64::MAX / 2));
        assert_eq!(config.delay_for_attempt(90), Duration::MAX);
    }

    #[test]
    fn test_default_condition_uses_retryable_flag() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&CollabError::network("offline")));
        assert!(!config.should_retry(&CollabError::permission_denied("no")));
        assert!(config.should_retry(&CollabError::unknown("flaky").with_retryable(true)));
    }

    #[test]
    fn test_custom_condition() {
        let config = RetryConfig::default()
            .with_retry_condition(|err| err.kind == crate::error::ErrorKind::StorageError);
        assert!(config.should_retry(&CollabError::storage("quota")));
        assert!(!config.should_retry(&CollabError::network("offline")));
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_debug_omits_condition() {
        let debug = format!("{:?}", RetryConfig::default());
        assert!(debug.contains("max_retries: 3"));
    }
}
