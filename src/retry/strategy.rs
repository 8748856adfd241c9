// src/retry/strategy.rs

use crate::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("Non-retryable error: {0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(error) => error,
        }
    }
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `f` until it succeeds or the attempt budget is spent.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_with_decision(f, |_| RetryDecision::Retry).await
    }

    /// Like [`execute`](Self::execute), but stops early on errors that
    /// `should_retry` rejects.
    pub async fn execute_with_decision<F, Fut, T, E>(
        &self,
        mut f: F,
        should_retry: impl Fn(&E) -> RetryDecision,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match f().await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if should_retry(&error) == RetryDecision::NoRetry {
                debug!(%error, "Error is non-retryable");
                return Err(RetryError::Permanent(error));
            }

            if attempt >= self.config.max_attempts {
                warn!(attempts = attempt, %error, "Retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let backoff = self.calculate_backoff(attempt);
            warn!(attempt, %error, ?backoff, "Attempt failed, retrying");
            sleep(backoff).await;
        }
    }

    /// Exponential backoff capped at `backoff_max`, plus up to 25% jitter.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base().as_millis() as u64;
        let max = self.config.backoff_max().as_millis() as u64;

        let exponential = base.saturating_mul(2u64.saturating_pow(attempt - 1));
        let capped = exponential.min(max);
        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;

        Duration::from_millis(capped + jitter)
    }
}
