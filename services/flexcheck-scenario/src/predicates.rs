//! Observations the scenario waits on or asserts.
//!
//! Every waiter predicate goes through [`guard_workload`] first, so a failed
//! workload ends any wait within one poll interval.

use std::sync::Arc;
use std::time::Duration;

use flexcheck_convergence::Observation;
use flexcheck_core::{
    AdminClient, ClusterControl, ClusterView, HarnessError, HarnessResult, MetricsSettings,
    MoveCompletion,
};
use flexcheck_metrics::{EntityKind, MetricsFetcher};
use flexcheck_workload::WorkloadController;
use tracing::{debug, info};

/// Fails with `WorkloadFailure` once the workload reported a failure.
pub fn guard_workload(workload: &WorkloadController) -> HarnessResult<()> {
    if workload.has_failures() {
        let reason = workload
            .failure_reason()
            .unwrap_or_else(|| "workload generator reported failures".to_string());
        return Err(HarnessError::workload_failure(reason));
    }
    Ok(())
}

/// Ops completed reached `target`.
pub fn ops_at_least(workload: &WorkloadController, target: i64) -> HarnessResult<Observation> {
    guard_workload(workload)?;
    let ops = workload.current_ops();
    Ok(Observation::when(ops >= target, format!("{ops} ops (target {target})")))
}

/// Read-only view of cluster state through the admin API and metrics endpoints.
pub struct ClusterProbe {
    control: Arc<dyn ClusterControl>,
    admin: Arc<dyn AdminClient>,
    metrics: Arc<dyn MetricsFetcher>,
    settings: MetricsSettings,
}

impl ClusterProbe {
    pub fn new(
        control: Arc<dyn ClusterControl>,
        admin: Arc<dyn AdminClient>,
        metrics: Arc<dyn MetricsFetcher>,
        settings: MetricsSettings,
    ) -> Self {
        Self {
            control,
            admin,
            metrics,
            settings,
        }
    }

    /// Live data-plane nodes according to the leader master's metrics.
    pub async fn live_tablet_servers(&self) -> HarnessResult<i64> {
        let leader = self.admin.leader_admin_host_port().await?;
        let view = ClusterView::new(self.control.masters().await?, Vec::new());
        let master = view.master_at(&leader).ok_or_else(|| {
            HarnessError::assertion(format!("leader master {leader} is not a known master"))
        })?;

        let doc = self.metrics.fetch(&master.host, master.metrics_port).await?;
        let live = doc.find_counter(EntityKind::Cluster, |_| true, &self.settings.live_nodes_metric)?;
        debug!(leader = %leader, live, "Read live tablet servers");
        Ok(live)
    }

    /// Fails unless the live count is exactly `expected`.
    pub async fn assert_live_tablet_servers(&self, expected: usize) -> HarnessResult<()> {
        let live = self.live_tablet_servers().await?;
        if live != expected as i64 {
            return Err(HarnessError::assertion(format!(
                "expected {expected} live tablet servers, found {live}"
            )));
        }
        info!(live, "Found expected live tablet servers");
        Ok(())
    }

    /// Live count equals `expected`.
    ///
    /// Any other count is an `AssertionViolation`. Only an unreachable
    /// endpoint leaves the observation open for another poll.
    pub async fn live_tablet_servers_equal(&self, expected: usize) -> HarnessResult<Observation> {
        self.assert_live_tablet_servers(expected).await?;
        Ok(Observation::converged(format!("{expected} live")))
    }

    /// Load balancer currently reports balance over `expected` nodes.
    pub async fn load_balanced(&self, expected: usize) -> HarnessResult<Observation> {
        let balanced = self.admin.wait_for_load_balance(Duration::ZERO, expected).await?;
        let observed = if balanced { "balanced" } else { "not balanced" };
        Ok(Observation::when(balanced, format!("{observed} over {expected} nodes")))
    }

    /// One move-wait poll: the live count must still be `expected_live`,
    /// then reads the move completion.
    ///
    /// A changed live count is an `AssertionViolation`, not a pending state.
    pub async fn move_progress(&self, expected_live: usize) -> HarnessResult<MoveCompletion> {
        self.assert_live_tablet_servers(expected_live).await?;
        let completion = self.admin.load_move_completion().await?;
        info!(%completion, "Move completion");
        Ok(completion)
    }

    /// Every running data-plane node served at least `min_ops` requests.
    ///
    /// A node below `min_ops` is an `AssertionViolation`.
    pub async fn verify_node_ops(&self, min_ops: i64) -> HarnessResult<Observation> {
        let nodes = self.control.tablet_servers().await?;
        for node in &nodes {
            let doc = self.metrics.fetch(&node.host, node.metrics_port).await?;
            let ops = doc.sum_counter(EntityKind::Server, |_| true, &self.settings.op_count_metric)?;
            info!(node = %node.rpc_address(), ops, min_ops, "Tablet server ops");
            if ops < min_ops {
                return Err(HarnessError::assertion(format!(
                    "tablet server {} served {ops} ops, expected at least {min_ops}",
                    node.rpc_address()
                )));
            }
        }
        Ok(Observation::converged(format!(
            "{} tablet servers at >= {min_ops} ops",
            nodes.len()
        )))
    }
}
