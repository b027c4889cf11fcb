//! Retry budget for lock acquisition.

use std::time::Duration;

use tracing::debug;

use crate::error::{LockError, Result};

/// Counts failed acquire attempts and paces the next one.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// `None` means unlimited.
    remaining: Option<u64>,
    delay: Duration,
    attempts: u64,
}

impl RetryStrategy {
    /// Creates a strategy allowing `retry_count` retries after the first
    /// attempt. A negative count means unlimited.
    #[must_use]
    pub fn new(retry_count: i64, delay: Duration) -> Self {
        Self {
            remaining: u64::try_from(retry_count).ok(),
            delay,
            attempts: 0,
        }
    }

    /// Returns the number of failed attempts recorded so far.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Records a failed attempt on `resource`.
    ///
    /// Sleeps for the configured delay if another attempt is allowed, or
    /// returns [`LockError::RetriesExceeded`] if the budget is spent.
    pub async fn failed_attempt(&mut self, resource: &str) -> Result<()> {
        self.attempts += 1;
        match self.remaining {
            Some(0) => {
                return Err(LockError::RetriesExceeded {
                    resource: resource.to_string(),
                    attempts: self.attempts,
                });
            }
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        debug!(
            resource = %resource,
            attempt = self.attempts,
            delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
            "Lock not acquired, retrying"
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
