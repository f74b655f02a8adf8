//! Bounded exponential backoff around LLM provider calls.
//!
//! [`Backoff`] holds the attempt counter and the next delay, and decides after
//! each failure whether to retry. It does no I/O; [`retry_with_backoff`] drives
//! it with `tokio::time::sleep`.

use std::future::Future;
use std::time::Duration;

use crate::services::llm::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(40),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
            next_delay: self.base_delay.min(self.max_delay),
        }
    }
}

/// Decision taken after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    next_delay: Duration,
}

impl Backoff {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and decide what happens next.
    pub fn on_failure(&mut self, transient: bool, retry_after: Option<Duration>) -> BackoffStep {
        self.attempts += 1;
        if !transient || self.attempts >= self.policy.max_attempts.max(1) {
            return BackoffStep::GiveUp;
        }

        let delay = retry_after
            .unwrap_or(self.next_delay)
            .min(self.policy.max_delay);
        self.next_delay = self
            .next_delay
            .checked_mul(2)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);

        BackoffStep::Retry {
            attempt: self.attempts,
            delay,
        }
    }
}

/// Passed to the retry observer before each sleep.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub error: &'a LlmError,
}

impl RetryNotice<'_> {
    pub fn log_line(&self) -> String {
        format!(
            "Attempt {}/{} failed: {}. Retrying in {} ms...",
            self.attempt,
            self.max_attempts,
            self.error,
            self.delay.as_millis()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: LlmError,
    },

    #[error("{0}")]
    Fatal(#[source] LlmError),
}

/// Run `op` until it succeeds, fails non-transiently, or the policy is exhausted.
pub async fn retry_with_backoff<T, F, Fut, N>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: N,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
    N: FnMut(&RetryNotice<'_>),
{
    let mut backoff = policy.backoff();
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match backoff.on_failure(error.is_transient(), error.retry_after()) {
            BackoffStep::Retry { attempt, delay } => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "LLM call failed, backing off"
                );
                metrics::counter!("llm_retries_total").increment(1);
                on_retry(&RetryNotice {
                    attempt,
                    max_attempts: policy.max_attempts.max(1),
                    delay,
                    error: &error,
                });
                tokio::time::sleep(delay).await;
            }
            BackoffStep::GiveUp if error.is_transient() => {
                return Err(RetryError::Exhausted {
                    attempts: backoff.attempts(),
                    last: error,
                });
            }
            BackoffStep::GiveUp => return Err(RetryError::Fatal(error)),
        }
    }
}
