use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HarnessResult;
use crate::types::{HostPort, MoveCompletion, NodeHandle, NodeInfo, NodeSpec};
use crate::workload::WorkloadSpec;

/// Administrative API of the cluster's control plane.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// RPC address of the current leader master.
    async fn leader_admin_host_port(&self) -> HarnessResult<HostPort>;

    /// Blocks until the load balancer reports a balanced cluster spanning
    /// `expected_servers` tablet servers, or `timeout` elapses.
    ///
    /// Returns whether balance was reached.
    async fn wait_for_load_balance(
        &self,
        timeout: Duration,
        expected_servers: usize,
    ) -> HarnessResult<bool>;

    /// Progress of the data move triggered by the current blacklist.
    async fn load_move_completion(&self) -> HarnessResult<MoveCompletion>;

    /// Replaces the cluster's blacklist.
    ///
    /// Fails with `AdminRpc` when the control plane rejects the change.
    async fn submit_blacklist(&self, hosts: Vec<HostPort>, on_data_plane: bool) -> HarnessResult<()>;
}

/// Process lifecycle control over the nodes of a cluster.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Starts a new tablet server.
    async fn start_node(&self, spec: &NodeSpec) -> HarnessResult<NodeHandle>;

    /// Terminates the tablet server listening on `rpc_port` without a graceful shutdown.
    async fn kill_node_on_port(&self, rpc_port: u16) -> HarnessResult<()>;

    /// Currently registered masters.
    async fn masters(&self) -> HarnessResult<Vec<NodeInfo>>;

    /// Currently running tablet servers.
    async fn tablet_servers(&self) -> HarnessResult<Vec<NodeInfo>>;

    /// Waits until `count` tablet servers have registered with the masters.
    async fn wait_for_tablet_servers(&self, count: usize, timeout: Duration) -> HarnessResult<bool>;

    /// Interval after which a silent tablet server is declared dead.
    fn heartbeat_timeout(&self) -> Duration;

    /// Client-facing endpoints the workload should connect to.
    async fn contact_points(&self) -> HarnessResult<Vec<HostPort>>;

    /// Stops every node. Must be safe to call more than once.
    async fn shutdown(&self) -> HarnessResult<()>;
}

/// An external workload generator driven by the harness.
#[async_trait]
pub trait WorkloadGenerator: Send + Sync {
    /// Runs until stopped or failed.
    async fn run(&self) -> HarnessResult<()>;

    /// Asks `run` to return; never forces termination.
    fn request_stop(&self);

    fn ops_completed(&self) -> i64;

    fn has_failures(&self) -> bool;

    fn exception_count(&self) -> i64;
}

/// Builds workload generators from a [`WorkloadSpec`].
pub trait WorkloadFactory: Send + Sync {
    fn create(&self, spec: &WorkloadSpec) -> HarnessResult<Arc<dyn WorkloadGenerator>>;
}
