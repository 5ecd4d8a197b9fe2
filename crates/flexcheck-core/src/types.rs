//! Cluster membership and timing types shared by every harness component.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::HarnessError;
use crate::ids::NodeId;

/// Network address of a node endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    /// Creates a new address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| HarnessError::Config(format!("`{s}` is not host:port")))?;
        if host.is_empty() {
            return Err(HarnessError::Config(format!("`{s}` has an empty host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| HarnessError::Config(format!("`{s}` has an invalid port: {e}")))?;
        Ok(Self::new(host, port))
    }
}

/// Which plane a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Control-plane node (master).
    Master,
    /// Data-plane node (tablet server).
    TabletServer,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::TabletServer => f.write_str("tserver"),
        }
    }
}

/// Description of one running node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub role: NodeRole,
    pub host: String,
    /// RPC port; the key the control plane uses for blacklists and kills.
    pub rpc_port: u16,
    /// Administrative web port.
    pub admin_port: u16,
    /// Port serving `GET /metrics`.
    pub metrics_port: u16,
}

impl NodeInfo {
    /// RPC address, as submitted in blacklists.
    #[must_use]
    pub fn rpc_address(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.rpc_port)
    }

    /// Address of the metrics endpoint.
    #[must_use]
    pub fn metrics_address(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.metrics_port)
    }

    /// Handle that can later be passed to a kill request.
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            id: self.id,
            host: self.host.clone(),
            rpc_port: self.rpc_port,
        }
    }
}

/// Opaque handle to a node started by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    pub id: NodeId,
    pub host: String,
    pub rpc_port: u16,
}

impl NodeHandle {
    /// RPC address of the node behind this handle.
    #[must_use]
    pub fn rpc_address(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.rpc_port)
    }
}

/// Parameters for starting a new node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Extra command-line flags passed to the node process.
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

/// Snapshot of cluster membership keyed by RPC port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    pub masters: BTreeMap<u16, NodeInfo>,
    pub tablet_servers: BTreeMap<u16, NodeInfo>,
}

impl ClusterView {
    /// Builds a view from the nodes reported by the cluster.
    #[must_use]
    pub fn new(masters: Vec<NodeInfo>, tablet_servers: Vec<NodeInfo>) -> Self {
        Self {
            masters: masters.into_iter().map(|n| (n.rpc_port, n)).collect(),
            tablet_servers: tablet_servers.into_iter().map(|n| (n.rpc_port, n)).collect(),
        }
    }

    /// Number of data-plane nodes in the snapshot.
    #[must_use]
    pub fn num_tablet_servers(&self) -> usize {
        self.tablet_servers.len()
    }

    /// The data-plane nodes as a blacklist target.
    #[must_use]
    pub fn blacklist_set(&self) -> BlacklistSet {
        self.tablet_servers.values().map(NodeInfo::rpc_address).collect()
    }

    /// Handles for every data-plane node.
    #[must_use]
    pub fn tablet_server_handles(&self) -> Vec<NodeHandle> {
        self.tablet_servers.values().map(NodeInfo::handle).collect()
    }

    /// Finds a master by its RPC address.
    #[must_use]
    pub fn master_at(&self, address: &HostPort) -> Option<&NodeInfo> {
        self.masters
            .get(&address.port)
            .filter(|m| m.host == address.host)
    }
}

/// Data-plane nodes marked for graceful evacuation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlacklistSet(BTreeSet<HostPort>);

impl BlacklistSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an address; returns false if it was already present.
    pub fn insert(&mut self, address: HostPort) -> bool {
        self.0.insert(address)
    }

    #[must_use]
    pub fn contains(&self, address: &HostPort) -> bool {
        self.0.contains(address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostPort> {
        self.0.iter()
    }

    /// Addresses in sorted order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<HostPort> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<HostPort> for BlacklistSet {
    fn from_iter<T: IntoIterator<Item = HostPort>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Start time plus allowed duration for one convergence wait.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Starts a deadline now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }
}

/// Data migration progress reported by the control plane after a blacklist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveCompletion {
    pub percent_completed: f64,
}

impl MoveCompletion {
    #[must_use]
    pub fn new(percent_completed: f64) -> Self {
        Self { percent_completed }
    }

    /// True once every tablet has left the blacklisted nodes.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.percent_completed >= 100.0
    }
}

impl fmt::Display for MoveCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.percent_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tserver(port: u16) -> NodeInfo {
        NodeInfo {
            id: NodeId::new(),
            role: NodeRole::TabletServer,
            host: "127.0.0.1".to_string(),
            rpc_port: port,
            admin_port: port + 1000,
            metrics_port: port + 2000,
        }
    }

    #[test]
    fn host_port_parses_and_displays() {
        let hp: HostPort = "127.0.0.2:9100".parse().unwrap();
        assert_eq!(hp, HostPort::new("127.0.0.2", 9100));
        assert_eq!(hp.to_string(), "127.0.0.2:9100");

        assert!("no-port".parse::<HostPort>().is_err());
        assert!(":9100".parse::<HostPort>().is_err());
        assert!("host:99999".parse::<HostPort>().is_err());
    }

    #[test]
    fn view_builds_blacklist_from_tablet_servers() {
        let view = ClusterView::new(vec![], vec![tserver(9102), tserver(9100), tserver(9101)]);
        let blacklist = view.blacklist_set();

        assert_eq!(view.num_tablet_servers(), 3);
        assert_eq!(blacklist.len(), 3);
        let ports: Vec<u16> = blacklist.iter().map(|hp| hp.port).collect();
        assert_eq!(ports, vec![9100, 9101, 9102]);
    }

    #[test]
    fn move_completion_requires_full_percent() {
        assert!(!MoveCompletion::new(99.9).is_complete());
        assert!(MoveCompletion::new(100.0).is_complete());
        assert_eq!(MoveCompletion::new(42.5).to_string(), "42.5%");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_after_timeout() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert!(!deadline.is_expired());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
