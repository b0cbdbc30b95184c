//! Bounded retry with backoff around fallible storage actions.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Attempts made unless configured otherwise.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Runs a fallible action up to N times, backing off `10·i²` ms after
/// failed attempt `i`.
///
/// The wrapped action must be one transactional unit: retrying re-executes
/// the statement, never re-serialization or a fresh clock sample. Reads are
/// not retried; the facade degrades them instead.
#[derive(Clone, Copy, Debug)]
pub struct RetryExecutor {
    attempts: u32,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS)
    }
}

impl RetryExecutor {
    /// Executor with an explicit attempt budget (minimum 1).
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(10 * u64::from(attempt) * u64::from(attempt))
    }

    /// Runs `action` until it succeeds or the attempt budget is spent; the
    /// final failure propagates.
    pub async fn run<T, F, Fut>(&self, mut action: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match action().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.attempts => {
                    warn!(attempt, error = %error, "storage action failed, backing off");
                    tokio::time::sleep(Self::backoff(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
