use crate::{Error, Result};
use std::time::Duration;

/// Delivery and retry settings of the job consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Deliveries before a failing job is dead-lettered.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    /// Messages requested per receive.
    pub batch_size: usize,
    /// Sleep between receives that returned nothing.
    pub idle_poll_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            batch_size: 10,
            idle_poll_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput("max_attempts must be > 0".to_string()));
        }
        if self.backoff_base_ms == 0 {
            return Err(Error::InvalidInput("backoff_base_ms must be > 0".to_string()));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(Error::InvalidInput(
                "backoff_max_ms must be >= backoff_base_ms".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".to_string()));
        }
        if self.idle_poll_ms == 0 {
            return Err(Error::InvalidInput("idle_poll_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Delay before redelivering a job that failed on delivery `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        // base * 2^(attempt-1), capped.
        let shift = attempt.saturating_sub(1).min(63);
        let exp = 1u128 << shift;
        let ms = (self.backoff_base_ms as u128).saturating_mul(exp);
        Duration::from_millis(ms.min(self.backoff_max_ms as u128) as u64)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let p = RetryPolicy {
            backoff_base_ms: 1_000,
            backoff_max_ms: 5_000,
            ..Default::default()
        };
        let schedule: Vec<u64> = (1..=5).map(|a| p.backoff(a).as_millis() as u64).collect();
        assert_eq!(schedule, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
        assert_eq!(p.backoff(200), Duration::from_millis(5_000));
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(RetryPolicy::default().validate().is_ok());
        let p = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(p.validate().is_err());
        let p = RetryPolicy {
            backoff_base_ms: 10,
            backoff_max_ms: 5,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
