//! Core domain types and collaborator traits for the flexcheck elasticity harness.

pub mod config;
pub mod error;
pub mod ids;
pub mod traits;
pub mod types;
pub mod workload;

pub use config::{ClusterSettings, HarnessConfig, MetricsSettings, TimeoutSettings, WorkloadSettings};
pub use error::{HarnessError, HarnessResult};
pub use ids::{NodeId, RunId};
pub use traits::{AdminClient, ClusterControl, WorkloadFactory, WorkloadGenerator};
pub use types::{
    BlacklistSet, ClusterView, Deadline, HostPort, MoveCompletion, NodeHandle, NodeInfo, NodeRole,
    NodeSpec,
};
pub use workload::{WorkloadCounters, WorkloadSpec};
