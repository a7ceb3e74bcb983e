//! Bounded retry with exponential, jittered backoff.
//!
//! [`RetryPolicy::run`] wraps one upstream call attempt. Failures for
//! which [`LlmError::is_retryable`] is `false` propagate on first
//! occurrence. Transient failures are retried until the attempt budget
//! is spent, then surface as [`LlmError::RetryExhausted`] carrying the
//! attempt count and the last error.
//!
//! Only model calls go through a retry policy. Tool handlers have side
//! effects and are never retried by the engine.
//!
//! ```rust
//! use std::time::Duration;
//! use llm_relay::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::with_max_retries(2).initial_backoff(Duration::from_millis(100));
//! assert_eq!(policy.max_attempts, 3);
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::duration_ms;
use crate::error::LlmError;

/// How many times to attempt an upstream call and how long to wait between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`: each delay is scaled by a random
    /// factor in `[1 - jitter, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` total attempts and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy allowing `max_retries` retries after the first attempt.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(max_retries.saturating_add(1))
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Sets the first delay.
    #[must_use]
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Sets the jitter fraction, clamped to `[0, 1]`.
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// The delay before retry number `attempt` (1-based), jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_possible_wrap)] // attempt counts stay far below i32::MAX
        let base = self.initial_backoff.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::rng().random_range((1.0 - jitter)..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }

    /// Runs `op` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `op` is invoked at most `max_attempts` times. The backoff sleep only
    /// suspends this call.
    ///
    /// # Errors
    ///
    /// - The first non-retryable error, unchanged.
    /// - [`LlmError::RetryExhausted`] wrapping the last transient error once
    ///   every attempt has failed.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };
            if attempt >= max_attempts {
                return Err(LlmError::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }
            let delay = self.delay_for(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Applies an optional deadline to `fut`.
///
/// Expiry maps to [`LlmError::Timeout`], which the retry policy treats
/// as transient.
pub async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T, LlmError>>,
) -> Result<T, LlmError> {
    match deadline {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| {
                Err(LlmError::Timeout {
                    elapsed_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }),
    }
}
