//! Exponential backoff retry logic for completion calls.
//!
//! Both calling conventions share one policy: up to `max_attempts` total
//! attempts, with a randomized exponential delay between them. Only
//! transient errors (see [`ErrorKind`]) are retried; terminal errors are
//! returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorKind, GatewayError, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (default: 6).
    pub max_attempts: u32,
    /// Exponential base: the ceiling before attempt `n` is `multiplier * 2^(n-1)` (default: 1 second).
    pub multiplier: Duration,
    /// Lower bound for every delay (default: 5 seconds).
    pub min_delay: Duration,
    /// Upper bound for every delay (default: 60 seconds).
    pub max_delay: Duration,
    /// Draw each delay uniformly from `[min_delay, ceiling]` instead of using the ceiling (default: true).
    pub jitter: bool,
    /// Give up once waiting again would take the whole operation past this budget.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: true,
            max_elapsed: None,
        }
    }
}

impl RetryConfig {
    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn over_budget(&self, elapsed: Duration, next_delay: Duration) -> bool {
        self.max_elapsed
            .is_some_and(|budget| elapsed.saturating_add(next_delay) > budget)
    }
}

/// Determines whether a [`GatewayError`] should be retried.
pub fn is_retryable(err: &GatewayError) -> bool {
    err.kind() == ErrorKind::Transient
}

/// Calculate the delay after failed attempt `attempt` (1-based).
///
/// The ceiling is `multiplier * 2^(attempt-1)` clamped to
/// `[min_delay, max_delay]`. With jitter the delay is uniform in
/// `[min_delay, ceiling]`; without it the delay is the ceiling.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let max_ms = config.max_delay.as_millis() as u64;
    let min_ms = (config.min_delay.as_millis() as u64).min(max_ms);
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
    let ceiling_ms = (config.multiplier.as_millis() as u64)
        .saturating_mul(exp)
        .clamp(min_ms, max_ms);

    let ms = if config.jitter && ceiling_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..=ceiling_ms)
    } else {
        ceiling_ms
    };
    Duration::from_millis(ms)
}

/// The delay to use after `err`, honouring a provider-suggested wait.
///
/// A rate-limit hint can lengthen the computed delay but never past
/// `max_delay`.
pub fn delay_for(config: &RetryConfig, attempt: u32, err: &GatewayError) -> Duration {
    let computed = compute_delay(config, attempt);
    match err {
        GatewayError::RateLimited { retry_after_ms } => computed
            .max(Duration::from_millis(*retry_after_ms))
            .min(config.max_delay),
        _ => computed,
    }
}

/// Run `op` under the retry policy on the async runtime.
///
/// `op` receives the 1-based attempt number. A warning is logged before
/// every backoff sleep. Cancelling `cancel` interrupts the sleep.
pub async fn retry_async<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.attempts();
    let started = tokio::time::Instant::now();
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let delay = delay_for(config, attempt, &err);
        if config.over_budget(started.elapsed(), delay) {
            warn!(operation, attempt, error = %err, "retry budget exhausted");
            return Err(err);
        }

        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Run `op` under the retry policy on the calling thread.
///
/// Backoff sleeps go through `sleep` so callers can substitute a clock.
/// Retries are only logged at debug level.
pub fn retry_blocking<T, F, S>(config: &RetryConfig, operation: &str, mut op: F, sleep: S) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    S: Fn(Duration),
{
    let max_attempts = config.attempts();
    let started = std::time::Instant::now();
    let mut attempt = 1;

    loop {
        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let delay = delay_for(config, attempt, &err);
        if config.over_budget(started.elapsed(), delay) {
            return Err(err);
        }

        debug!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying blocking request"
        );
        sleep(delay);
        attempt += 1;
    }
}
