//! In-process stand-ins for a cluster under test and its workload generator.
//!
//! [`SimulatedCluster`] implements the admin, lifecycle and metrics
//! interfaces against an in-memory model driven by the tokio clock.
//! [`SimulatedWorkload`] pushes ops into it. Both take a fault plan so that
//! failure paths can be exercised deterministically.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flexcheck_core::AdminClient;
//! use flexcheck_sim::{FaultPlan, SimConfig, SimulatedCluster};
//!
//! # async fn example() -> flexcheck_core::HarnessResult<()> {
//! let config = SimConfig::default().with_faults(FaultPlan {
//!     reject_blacklist: true,
//!     ..FaultPlan::default()
//! });
//! let cluster = Arc::new(SimulatedCluster::new(config));
//! assert!(cluster.submit_blacklist(vec![], true).await.is_err());
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod workload;

pub use cluster::{KillRecord, SimulatedCluster, SIM_HOST};
pub use config::{FaultPlan, SimConfig, SimWorkloadConfig};
pub use workload::{SimulatedWorkload, SimulatedWorkloadFactory};
