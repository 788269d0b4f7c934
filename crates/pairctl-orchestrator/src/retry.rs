//! Bounded polling with backoff.
//!
//! Every wait in the crate goes through [`poll_until`], which stops at
//! whichever comes first of the attempt budget and the deadline. There is no
//! unbounded loop anywhere.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;

/// Delay schedule and budget for a polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Growth factor between attempts; 1.0 polls at a fixed interval.
    pub multiplier: f64,

    /// Maximum number of attempts.
    pub max_attempts: u32,

    /// Overall deadline measured from the first attempt.
    pub timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500), Duration::from_secs(30), 10)
    }
}

impl BackoffPolicy {
    /// Polls at a fixed interval until `timeout`.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        let attempts = if interval.is_zero() {
            u32::MAX
        } else {
            (timeout.as_millis() / interval.as_millis().max(1)) as u32 + 1
        };
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            max_attempts: attempts.max(1),
            timeout,
        }
    }

    /// Doubles the delay after each attempt, up to `max_delay`.
    ///
    /// Bounded by the attempt count alone until [`with_timeout`](Self::with_timeout)
    /// adds a deadline.
    pub fn exponential(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            max_attempts: max_attempts.max(1),
            timeout: Duration::MAX,
        }
    }

    /// Sets the overall deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the delay after attempt `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Returns the sum of all delays the attempt budget allows.
    pub fn budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|a| self.delay_for_attempt(a))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// Result of a bounded poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The check reported success.
    Ready(T),

    /// The budget ran out first.
    Exhausted {
        /// Number of checks made.
        attempts: u32,
        /// Time spent.
        elapsed: Duration,
    },
}

/// Polls `check` until it yields a value or the policy's budget is spent.
///
/// The check returns `Ok(Some(value))` when done and `Ok(None)` to keep
/// waiting. Retryable errors (see
/// [`OrchestratorError::is_retryable`](crate::error::OrchestratorError::is_retryable))
/// are logged and polling continues; any other error ends the poll.
pub async fn poll_until<T, F, Fut>(policy: &BackoffPolicy, what: &str, mut check: F) -> Result<PollOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        match check(attempt).await {
            Ok(Some(value)) => {
                debug!(what, attempts = attempt + 1, "Condition reached");
                return Ok(PollOutcome::Ready(value));
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                warn!(what, attempt = attempt + 1, error = %e, "Transient error while polling");
            }
            Err(e) => return Err(e),
        }

        attempt += 1;
        let delay = policy.delay_for_attempt(attempt - 1);
        let elapsed = started.elapsed();
        if attempt >= policy.max_attempts || elapsed.saturating_add(delay) > policy.timeout {
            return Ok(PollOutcome::Exhausted {
                attempts: attempt,
                elapsed,
            });
        }

        debug!(what, attempt, delay_ms = delay.as_millis() as u64, "Condition not reached, backing off");
        tokio::time::sleep(delay).await;
    }
}
