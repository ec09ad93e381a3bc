//! Bounded exponential backoff.
//!
//! Used for readiness probes, network removal and the orchestrator's
//! readiness poll. Timing is based on `tokio::time::Instant` so tests can run
//! with a paused clock.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How long and how often to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Growth factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Total time budget; once spent the last error is returned.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Default backoff shape with a different total budget.
    pub fn with_max_elapsed(max_elapsed: Duration) -> Self {
        Self {
            max_elapsed,
            ..Self::default()
        }
    }

    /// Start a fresh backoff schedule anchored at "now".
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            started: Instant::now(),
            current: self.initial_delay,
            attempts: 0,
        }
    }

    /// Run `op` until it succeeds or the time budget is spent.
    ///
    /// Returns the error of the last attempt when giving up.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut backoff = self.backoff();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::debug!(
                            operation,
                            attempt = backoff.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "attempt failed, retrying",
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::debug!(
                            operation,
                            attempts = backoff.attempts(),
                            error = %err,
                            "retry budget exhausted",
                        );
                        return Err(err);
                    }
                },
            }
        }
    }
}

/// A running backoff schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    started: Instant,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Record a failed attempt and return how long to wait before the next
    /// one, or `None` once the time budget is spent.
    ///
    /// The returned delay never runs past the deadline.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        let elapsed = self.started.elapsed();
        if elapsed >= self.policy.max_elapsed {
            return None;
        }
        let remaining = self.policy.max_elapsed - elapsed;
        let delay = self.current.min(remaining);
        self.current = self
            .current
            .mul_f64(self.policy.multiplier.max(1.0))
            .min(self.policy.max_delay);
        Some(delay)
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the schedule started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
