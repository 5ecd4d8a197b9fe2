use serde::{Deserialize, Serialize};

use crate::types::HostPort;

/// What the workload generator should run and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Name of the workload (e.g. `"CassandraStockTicker"`).
    pub workload_name: String,
    /// Client-facing endpoints of the cluster.
    pub contact_points: Vec<HostPort>,
    pub verbose: bool,
}

impl WorkloadSpec {
    /// Comma-separated `host:port` list, as accepted by the generator's `--nodes` flag.
    #[must_use]
    pub fn contact_points_string(&self) -> String {
        self.contact_points
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Command-line form understood by the workload generator.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(5);
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args.push("--workload".to_string());
        args.push(self.workload_name.clone());
        args.push("--nodes".to_string());
        args.push(self.contact_points_string());
        args
    }
}

/// Point-in-time copy of the workload's live counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadCounters {
    /// Operations completed so far; never decreases.
    pub ops_completed: i64,
    /// Exceptions the generator swallowed and counted.
    pub exception_count: i64,
    /// Permanently true once the generator failed.
    pub failed: bool,
}
