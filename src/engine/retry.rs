use std::thread;
use std::time::Duration;

/// Delay applied between attempts of the same task. How many attempts a task
/// gets is the task's own `retry_count`; this only shapes the spacing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Whether to use exponential backoff
    pub use_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay_ms: 250,
            use_backoff: false,
        }
    }
}

impl RetryPolicy {
    /// No delay at all; useful in tests
    pub fn immediate() -> Self {
        Self {
            retry_delay_ms: 0,
            use_backoff: false,
        }
    }

    /// Calculate delay before the given retry (0-based)
    pub fn calculate_delay(&self, retry_index: u32) -> Duration {
        let delay = if self.use_backoff {
            self.retry_delay_ms * 2_u64.pow(retry_index)
        } else {
            self.retry_delay_ms
        };
        Duration::from_millis(delay)
    }

    /// Sleep for the appropriate delay
    pub fn sleep(&self, retry_index: u32) {
        let delay = self.calculate_delay(retry_index);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            retry_delay_ms: 100,
            use_backoff: false,
        };
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            retry_delay_ms: 100,
            use_backoff: true,
        };
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_immediate_policy() {
        assert!(RetryPolicy::immediate().calculate_delay(5).is_zero());
    }
}
