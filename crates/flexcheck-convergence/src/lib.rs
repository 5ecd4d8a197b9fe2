//! Bounded polling of asynchronous conditions.
//!
//! A condition is an async predicate returning an [`Observation`]. The waiter
//! evaluates it at least once, sleeps a fixed poll interval between
//! evaluations, and gives up with [`HarnessError::ConvergenceTimeout`] once the
//! deadline passes. A converged observation only counts if it was made
//! strictly before the deadline.
//!
//! Predicate errors are classified with [`HarnessError::is_transient`]:
//! transient errors become the last observation and the wait continues, any
//! other error aborts the wait on the spot.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use flexcheck_core::{Deadline, HarnessError, HarnessResult};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Result of one predicate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub converged: bool,
    /// Rendered observed value, kept for timeout diagnostics.
    pub observed: String,
}

impl Observation {
    #[must_use]
    pub fn converged(observed: impl fmt::Display) -> Self {
        Self {
            converged: true,
            observed: observed.to_string(),
        }
    }

    #[must_use]
    pub fn pending(observed: impl fmt::Display) -> Self {
        Self {
            converged: false,
            observed: observed.to_string(),
        }
    }

    /// Converged iff `holds`.
    #[must_use]
    pub fn when(holds: bool, observed: impl fmt::Display) -> Self {
        Self {
            converged: holds,
            observed: observed.to_string(),
        }
    }
}

/// Successful wait outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    pub elapsed: Duration,
    /// Number of predicate evaluations, including the converged one.
    pub polls: u32,
    pub observed: String,
}

/// Polls `predicate` every `poll_interval` until it converges or `timeout`
/// elapses.
pub async fn wait_until<F, Fut>(
    condition: &str,
    mut predicate: F,
    timeout: Duration,
    poll_interval: Duration,
) -> HarnessResult<Converged>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<Observation>>,
{
    let deadline = Deadline::after(timeout);
    let mut polls = 0u32;
    // Every non-returning poll sets this before the loop can exit
    let mut last_observed: String;

    loop {
        polls += 1;
        let result = predicate().await;
        let expired = deadline.is_expired();

        match result {
            Ok(observation) if observation.converged && !expired => {
                info!(
                    condition,
                    observed = %observation.observed,
                    elapsed_ms = deadline.elapsed().as_millis() as u64,
                    polls,
                    "Condition converged"
                );
                return Ok(Converged {
                    elapsed: deadline.elapsed(),
                    polls,
                    observed: observation.observed,
                });
            }
            Ok(observation) => {
                debug!(condition, observed = %observation.observed, polls, "Condition pending");
                last_observed = observation.observed;
            }
            Err(e) if e.is_transient() => {
                warn!(condition, polls, "Transient error while polling: {}", e);
                last_observed = format!("transient error: {e}");
            }
            Err(e) => {
                warn!(condition, polls, "Polling aborted: {}", e);
                return Err(e);
            }
        }

        if expired {
            break;
        }
        sleep(poll_interval.min(deadline.remaining())).await;
        if deadline.is_expired() {
            break;
        }
    }

    Err(HarnessError::ConvergenceTimeout {
        condition: condition.to_string(),
        last_observed,
        elapsed: deadline.elapsed(),
        timeout,
    })
}

/// [`wait_until`] with a fixed poll interval.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceWaiter {
    poll_interval: Duration,
}

impl ConvergenceWaiter {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn wait_until<F, Fut>(
        &self,
        condition: &str,
        predicate: F,
        timeout: Duration,
    ) -> HarnessResult<Converged>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<Observation>>,
    {
        wait_until(condition, predicate, timeout, self.poll_interval).await
    }
}

impl Default for ConvergenceWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
