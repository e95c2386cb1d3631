//! Consistency retry layer
//!
//! Freshly created identities take a while to become visible to the services
//! that reference them. Provider calls failing with a
//! [`TransientPropagation`](crate::ErrorCategory::TransientPropagation) error
//! are retried with exponential backoff and jitter; every other error is
//! returned immediately.

use crate::error::{ErrorCategory, ProviderError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Backoff configuration for propagation retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%)
    pub jitter: f64,
    /// Upper bound for a single delay
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Upper bound for the whole retried call
    #[serde(rename = "max_elapsed_ms", with = "millis")]
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Apply the configured jitter to a delay.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread.is_nan() || spread == 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Lifecycle of one retried call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    Failed,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Result of a retried call with its bookkeeping
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    /// Number of times the operation ran
    pub attempts: u32,
    /// Every state the call went through, starting at `Pending`
    pub history: Vec<RetryState>,
}

impl<T> RetryOutcome<T> {
    /// Terminal state of the call
    pub fn state(&self) -> RetryState {
        self.history.last().copied().unwrap_or(RetryState::Pending)
    }
}

/// Callback for retry progress notifications.
///
/// Called from worker threads.
pub trait RetryCallback: Send + Sync {
    /// Called before sleeping ahead of the next attempt.
    fn on_retry(&self, label: &str, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// Callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _: &str, _: u32, _: u32, _: &ProviderError, _: Duration) {}
}

/// Callback that logs a warning per retry.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, label: &str, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        log::warn!(
            "{label}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {:.1}s",
            delay.as_secs_f64()
        );
    }
}

/// Run `operation` under the retry policy.
///
/// The operation receives the 1-indexed attempt number. Exhausting the
/// attempt or time budget turns the last transient error into a
/// `PropagationTimeout` error.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    label: &str,
    callback: &dyn RetryCallback,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Result<T, ProviderError>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut history = vec![RetryState::Pending];
    let mut attempts = 0;

    loop {
        attempts += 1;
        history.push(RetryState::Attempting);

        let error = match operation(attempts) {
            Ok(value) => {
                history.push(RetryState::Succeeded);
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    history,
                };
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            history.push(RetryState::Failed);
            return RetryOutcome {
                result: Err(error),
                attempts,
                history,
            };
        }

        let delay = policy.jittered(policy.delay_for_attempt(attempts - 1));
        let out_of_attempts = attempts >= max_attempts;
        let out_of_time = started.elapsed() + delay > policy.max_elapsed;

        if out_of_attempts || out_of_time {
            history.push(RetryState::Failed);
            let reason = if out_of_attempts {
                format!("gave up after {attempts} attempts")
            } else {
                format!(
                    "gave up after {attempts} attempts and {:.1}s",
                    started.elapsed().as_secs_f64()
                )
            };
            return RetryOutcome {
                result: Err(ProviderError::new(
                    ErrorCategory::PropagationTimeout,
                    format!("{reason}: {}", error.message),
                )),
                attempts,
                history,
            };
        }

        callback.on_retry(label, attempts, max_attempts, &error, delay);
        history.push(RetryState::Retrying);
        thread::sleep(delay);
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
