use std::time::Duration;

use flexcheck_core::HarnessError;
use thiserror::Error;

use crate::phase::Phase;

/// A scenario failure, pinned to the phase it happened in.
#[derive(Debug, Error)]
#[error("scenario failed in phase `{phase}` after {elapsed:?}: {source}")]
pub struct ScenarioError {
    pub phase: Phase,
    /// Time since the scenario started.
    pub elapsed: Duration,
    #[source]
    pub source: HarnessError,
}

impl ScenarioError {
    pub fn new(phase: Phase, elapsed: Duration, source: HarnessError) -> Self {
        Self {
            phase,
            elapsed,
            source,
        }
    }
}
