//! Bounded retry for relay operations.

use crate::error::{ClientError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How many times an operation is attempted and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy with at least one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `attempt` until it succeeds, fails with a terminal error, or the policy is used up.
///
/// `attempt` receives the 1-based attempt number. Errors are classified with
/// [`ClientError::is_retryable`]; terminal errors are returned as-is, and running out of
/// attempts yields [`ClientError::RetriesExhausted`] wrapping the last error.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut current = 1;
    loop {
        match attempt(current).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) if current >= max_attempts => {
                return Err(ClientError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: current,
                    last: Box::new(error),
                });
            }
            Err(error) => {
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    operation, current, max_attempts, error, policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                current += 1;
            }
        }
    }
}
