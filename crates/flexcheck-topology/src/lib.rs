//! Topology mutations on the cluster under test: scale out, blacklist, kill.
//!
//! The mutator keeps the one piece of state the ordering rules need: the
//! outstanding blacklist and the last move completion observed for it. A
//! blacklisted node may only be killed after its data was observed fully
//! moved off.

use std::sync::Arc;
use std::time::Duration;

use flexcheck_core::{
    AdminClient, BlacklistSet, ClusterControl, ClusterView, Deadline, HarnessError, HarnessResult,
    MoveCompletion, NodeHandle, NodeSpec,
};
use tracing::{info, warn};

pub struct TopologyMutator {
    control: Arc<dyn ClusterControl>,
    admin: Arc<dyn AdminClient>,
    blacklist: Option<BlacklistSet>,
    last_move: Option<MoveCompletion>,
    killed: Vec<NodeHandle>,
}

impl TopologyMutator {
    pub fn new(control: Arc<dyn ClusterControl>, admin: Arc<dyn AdminClient>) -> Self {
        Self {
            control,
            admin,
            blacklist: None,
            last_move: None,
            killed: Vec::new(),
        }
    }

    /// Current membership as reported by the cluster.
    pub async fn snapshot(&self) -> HarnessResult<ClusterView> {
        let masters = self.control.masters().await?;
        let tablet_servers = self.control.tablet_servers().await?;
        Ok(ClusterView::new(masters, tablet_servers))
    }

    /// Starts one data-plane node.
    pub async fn add_node(&mut self, spec: &NodeSpec) -> HarnessResult<NodeHandle> {
        let handle = self.control.start_node(spec).await?;
        info!(node = %handle.rpc_address(), "Added tablet server");
        Ok(handle)
    }

    /// Starts `count` data-plane nodes with default settings.
    pub async fn add_nodes(&mut self, count: usize) -> HarnessResult<Vec<NodeHandle>> {
        let spec = NodeSpec::default();
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            handles.push(self.add_node(&spec).await?);
        }
        Ok(handles)
    }

    /// Waits until `count` data-plane nodes have registered.
    pub async fn wait_for_nodes(&self, count: usize, timeout: Duration) -> HarnessResult<()> {
        let deadline = Deadline::after(timeout);
        if self.control.wait_for_tablet_servers(count, timeout).await? {
            info!(count, elapsed_ms = deadline.elapsed().as_millis() as u64, "Tablet servers registered");
            return Ok(());
        }
        let running = self.control.tablet_servers().await?.len();
        Err(HarnessError::ConvergenceTimeout {
            condition: format!("{count} tablet servers registered"),
            last_observed: format!("{running} running"),
            elapsed: deadline.elapsed(),
            timeout,
        })
    }

    /// Marks `nodes` for evacuation.
    ///
    /// Only one submission may be outstanding. A rejection from the control
    /// plane is returned as is and leaves no blacklist recorded.
    pub async fn blacklist(&mut self, nodes: BlacklistSet, on_data_plane: bool) -> HarnessResult<()> {
        if let Some(outstanding) = &self.blacklist {
            return Err(HarnessError::assertion(format!(
                "blacklist of {} nodes already outstanding",
                outstanding.len()
            )));
        }
        if nodes.is_empty() {
            return Err(HarnessError::assertion("refusing to submit an empty blacklist"));
        }

        let hosts = nodes.to_vec();
        info!(nodes = ?hosts.iter().map(ToString::to_string).collect::<Vec<_>>(), "Submitting blacklist");
        self.admin.submit_blacklist(hosts, on_data_plane).await?;

        self.blacklist = Some(nodes);
        self.last_move = None;
        Ok(())
    }

    pub fn blacklisted(&self) -> Option<&BlacklistSet> {
        self.blacklist.as_ref()
    }

    /// Records the latest evacuation progress read from the control plane.
    pub fn record_move_completion(&mut self, completion: MoveCompletion) {
        self.last_move = Some(completion);
    }

    pub fn last_move_completion(&self) -> Option<MoveCompletion> {
        self.last_move
    }

    /// Terminates a node immediately.
    ///
    /// Fails without touching the cluster if the node is blacklisted and its
    /// move was not last observed at 100%.
    pub async fn kill_node(&mut self, handle: &NodeHandle) -> HarnessResult<()> {
        let address = handle.rpc_address();
        if let Some(blacklist) = &self.blacklist {
            if blacklist.contains(&address) {
                match self.last_move {
                    Some(completion) if completion.is_complete() => {}
                    Some(completion) => {
                        return Err(HarnessError::assertion(format!(
                            "refusing to kill {address}: move completion last observed at {completion}"
                        )));
                    }
                    None => {
                        return Err(HarnessError::assertion(format!(
                            "refusing to kill {address}: move completion never observed"
                        )));
                    }
                }
            }
        }

        self.control.kill_node_on_port(handle.rpc_port).await?;
        info!(node = %address, "Killed tablet server");
        self.killed.push(handle.clone());
        Ok(())
    }

    /// Nodes killed so far, in kill order.
    pub fn killed(&self) -> &[NodeHandle] {
        &self.killed
    }

    /// Forgets the outstanding blacklist once its nodes are gone.
    pub fn clear_blacklist(&mut self) -> Option<BlacklistSet> {
        let cleared = self.blacklist.take();
        if let Some(blacklist) = &cleared {
            let remaining = blacklist
                .iter()
                .filter(|address| !self.killed.iter().any(|k| &k.rpc_address() == *address))
                .count();
            if remaining > 0 {
                warn!(remaining, "Clearing blacklist with nodes still running");
            }
        }
        self.last_move = None;
        cleared
    }
}
