//! Cluster expand/shrink scenario.
//!
//! Starts a workload, doubles the data plane, waits for the load balancer,
//! blacklists the original nodes, waits for their data to move, kills them and
//! checks that the shrunken cluster keeps serving the workload without errors.

pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod predicates;
pub mod report;
pub mod template;

pub use error::ScenarioError;
pub use orchestrator::{Collaborators, ScenarioOrchestrator};
pub use phase::Phase;
pub use predicates::{guard_workload, ops_at_least, ClusterProbe};
pub use report::{Outcome, PhaseTiming, ScenarioReport};
pub use template::CONFIG_TEMPLATE;
