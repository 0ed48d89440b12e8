use crate::error::RuntimeError;
use std::{future::Future, time::Duration};

/// Retry an AWS call when it fails with one of a fixed set of error codes.
///
/// The delay doubles after every failed attempt: `base_delay * 2^attempt`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// AWS error codes that are worth retrying
    pub codes: &'static [&'static str],
}

impl RetryPolicy {
    /// Three attempts with a one second base delay.
    pub fn on_codes(codes: &'static [&'static str]) -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            codes,
        }
    }

    /// Backoff delay after the given zero-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    fn is_retryable(&self, err: &RuntimeError) -> bool {
        err.aws_code()
            .map(|code| self.codes.contains(&code))
            .unwrap_or(false)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// the attempts are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RuntimeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.is_retryable(&err) && attempt + 1 < self.attempts => {
                    let delay = self.delay(attempt);
                    tracing::warn!(error = %err, ?delay, "API call failed; backing off and retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Fixed-interval polling used while a resource applies a change.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitPolicy {
    /// Delay between two status reads
    pub interval: Duration,
    /// Number of status reads before giving up
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy {
            interval: Duration::from_secs(30),
            max_attempts: 60,
        }
    }
}

impl WaitPolicy {
    /// Poll `check` until it reports `true`.
    pub async fn until<F, Fut>(&self, what: &str, mut check: F) -> Result<(), RuntimeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, RuntimeError>>,
    {
        for attempt in 0..self.max_attempts {
            if check().await? {
                tracing::info!(what, attempt, "resource available");
                return Ok(());
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(RuntimeError::WaitTimeout(what.into()))
    }
}
