use std::time::Duration;

use chrono::{DateTime, Utc};
use flexcheck_core::RunId;
use serde::Serialize;
use tracing::{error, info};

use crate::error::ScenarioError;
use crate::phase::Phase;

/// Wall time spent in one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Serializable summary of a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { phase: Phase, message: String },
}

/// Everything observed during one scenario run.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub phases: Vec<PhaseTiming>,
    pub final_phase: Phase,
    pub total_ops: i64,
    pub exceptions: i64,
    pub outcome: Outcome,
    /// Problems hit while tearing down; never change the outcome.
    pub teardown_errors: Vec<String>,
    #[serde(skip)]
    pub error: Option<ScenarioError>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.final_phase == Phase::Done
    }

    /// Time spent in `phase`, if it was entered.
    pub fn phase_elapsed(&self, phase: Phase) -> Option<Duration> {
        self.phases
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.elapsed)
    }

    /// The report on success, the failure otherwise.
    pub fn into_result(self) -> Result<ScenarioReport, ScenarioError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn log_summary(&self) {
        for timing in &self.phases {
            info!(phase = %timing.phase, elapsed_ms = timing.elapsed.as_millis() as u64, "Phase timing");
        }
        match &self.outcome {
            Outcome::Passed => info!(
                run_id = %self.run_id,
                total_ops = self.total_ops,
                exceptions = self.exceptions,
                elapsed_ms = self.elapsed.as_millis() as u64,
                "Scenario passed"
            ),
            Outcome::Failed { phase, message } => error!(
                run_id = %self.run_id,
                phase = %phase,
                total_ops = self.total_ops,
                "Scenario failed: {}",
                message
            ),
        }
    }
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
