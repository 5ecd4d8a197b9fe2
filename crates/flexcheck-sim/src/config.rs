//! Simulator knobs and fault plans.

use std::time::Duration;

use flexcheck_core::HarnessConfig;

/// Faults the simulated cluster injects.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// `submit_blacklist` fails with `AdminRpc`.
    pub reject_blacklist: bool,

    /// Once the move is half done, one non-blacklisted tablet server drops out.
    pub drop_node_during_move: bool,

    /// Move completion never exceeds this percentage.
    pub stall_move_at: Option<f64>,

    /// The first N metrics fetches fail as unreachable.
    pub unreachable_fetches: u32,
}

/// Shape and timing of a simulated cluster.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub num_masters: usize,
    pub num_tablet_servers: usize,

    /// Silence after which the masters stop counting a node as live.
    pub heartbeat_timeout: Duration,

    /// Time between starting a node and it registering with the masters.
    pub startup_delay: Duration,

    /// Quiet period after the last membership change before the load
    /// balancer reports balance.
    pub rebalance_delay: Duration,

    /// Time for a blacklist evacuation to go from 0% to 100%.
    pub move_duration: Duration,

    pub op_count_metric: String,
    pub live_nodes_metric: String,

    pub faults: FaultPlan,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::from_harness(&HarnessConfig::default())
    }
}

impl SimConfig {
    /// Cluster shape, heartbeat timeout and metric names taken from `config`.
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            num_masters: config.cluster.num_masters,
            num_tablet_servers: config.cluster.num_tablet_servers,
            heartbeat_timeout: config.cluster.heartbeat_timeout(),
            startup_delay: Duration::from_millis(500),
            rebalance_delay: Duration::from_secs(3),
            move_duration: Duration::from_secs(20),
            op_count_metric: config.metrics.op_count_metric.clone(),
            live_nodes_metric: config.metrics.live_nodes_metric.clone(),
            faults: FaultPlan::default(),
        }
    }

    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }
}

/// Traffic produced by a simulated workload.
#[derive(Debug, Clone)]
pub struct SimWorkloadConfig {
    pub tick: Duration,
    pub ops_per_tick: i64,

    /// `run` fails once this many ops were completed.
    pub fail_after_ops: Option<i64>,

    /// Past this many ops, every tick records one client exception.
    pub exceptions_after_ops: Option<i64>,
}

impl Default for SimWorkloadConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            ops_per_tick: 600,
            fail_after_ops: None,
            exceptions_after_ops: None,
        }
    }
}
