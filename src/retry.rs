//! Exponential backoff with jitter and a cumulative-wait ceiling.
//!
//! One [`RetryPolicy`] type drives both retry loops in the harvester: the
//! network loop in [`crate::fetch`] (retrying transport failures and
//! retryable statuses) and the parse loop in [`crate::source::fetch_document`]
//! (retrying unparseable content). Each caller supplies its own
//! "is this retryable" predicate.
//!
//! # Schedule
//!
//! Attempt `n` waits `base^n / 2` seconds plus a uniform jitter in
//! `[0, base^n / 2]`, capped at `max_wait`. Waits are summed; once the sum
//! exceeds `stop_after_waiting` the next failure is returned instead of
//! retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Exponential backoff base.
    pub wait_base: f64,
    /// Ceiling on a single wait.
    pub max_wait: Duration,
    /// Once this much time has been spent waiting, stop retrying.
    pub stop_after_waiting: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait_base: 1.25,
            max_wait: Duration::from_secs(150),
            stop_after_waiting: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits and never retries.
    pub fn none() -> Self {
        Self {
            wait_base: 1.0,
            max_wait: Duration::ZERO,
            stop_after_waiting: Duration::ZERO,
        }
    }

    /// Whether this policy can ever retry. A zero `max_wait` would retry
    /// without the cumulative wait ever growing, so it never retries.
    fn retries(&self) -> bool {
        !self.max_wait.is_zero()
    }

    /// The wait before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let max = self.max_wait.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let wait = (self.wait_base.powi(exponent) / 2.0).min(max);
        if !wait.is_finite() || wait <= 0.0 {
            return Duration::ZERO;
        }
        let jitter = rng.random_range(0.0..=wait);
        Duration::from_secs_f64((wait + jitter).min(max))
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or the cumulative wait exceeds `stop_after_waiting`.
    ///
    /// The error returned after giving up is the last one observed.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        let mut elapsed = Duration::ZERO;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if self.retries()
                        && is_retryable(&err)
                        && elapsed <= self.stop_after_waiting =>
                {
                    attempt = attempt.saturating_add(1);
                    let wait = self.delay(attempt, &mut rand::rng());
                    if wait.is_zero() {
                        return Err(err);
                    }
                    debug!(
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(wait).await;
                    elapsed += wait;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
