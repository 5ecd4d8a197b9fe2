//! In-memory cluster with a failure detector, load balancer and blacklist mover.
//!
//! Nothing runs in the background. Every call reads the tokio clock and derives
//! node liveness, balance and move progress from the recorded timestamps, so
//! the whole cluster is deterministic under a paused clock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flexcheck_core::{
    AdminClient, BlacklistSet, ClusterControl, Deadline, HarnessError, HarnessResult, HostPort,
    MoveCompletion, NodeHandle, NodeId, NodeInfo, NodeRole, NodeSpec,
};
use flexcheck_metrics::{EntityKind, MetricEntry, MetricsDocument, MetricsEntity, MetricsFetcher};
use parking_lot::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::SimConfig;

pub const SIM_HOST: &str = "127.0.0.1";

const MASTER_RPC_BASE: u16 = 7100;
const MASTER_WEB_BASE: u16 = 7000;
const TSERVER_RPC_BASE: u16 = 9100;
const TSERVER_WEB_BASE: u16 = 9000;
const TSERVER_CQL_BASE: u16 = 9300;
const TSERVER_CQL_WEB_BASE: u16 = 12000;

const WAIT_STEP: Duration = Duration::from_millis(100);

/// Kill issued against the simulated cluster, with the move progress the
/// cluster itself had reached at that moment.
#[derive(Debug, Clone, PartialEq)]
pub struct KillRecord {
    pub address: HostPort,
    pub blacklisted: bool,
    pub move_completion: MoveCompletion,
    /// Offset from cluster creation.
    pub at: Duration,
}

#[derive(Debug)]
struct SimNode {
    info: NodeInfo,
    cql_port: u16,
    registered_at: Instant,
    killed_at: Option<Instant>,
    dropped: bool,
    ops: i64,
}

impl SimNode {
    fn is_running(&self) -> bool {
        self.killed_at.is_none() && !self.dropped
    }

    fn is_registered(&self, now: Instant) -> bool {
        now >= self.registered_at
    }

    /// Whether the masters still count this node, given its last heartbeat.
    fn is_live(&self, now: Instant, heartbeat_timeout: Duration) -> bool {
        if self.dropped || !self.is_registered(now) {
            return false;
        }
        match self.killed_at {
            None => true,
            Some(killed_at) => now < killed_at + heartbeat_timeout,
        }
    }
}

#[derive(Debug)]
struct Evacuation {
    targets: BlacklistSet,
    submitted_at: Instant,
}

#[derive(Debug)]
struct ClusterState {
    masters: Vec<NodeInfo>,
    tablet_servers: BTreeMap<u16, SimNode>,
    next_index: u16,
    balanced_after: Instant,
    evacuation: Option<Evacuation>,
    kill_log: Vec<KillRecord>,
    dropped: Vec<HostPort>,
    ops_cursor: usize,
    shut_down: bool,
}

impl ClusterState {
    fn add_tablet_server(&mut self, registered_at: Instant) -> NodeInfo {
        let index = self.next_index;
        self.next_index += 1;
        let info = NodeInfo {
            id: NodeId::new(),
            role: NodeRole::TabletServer,
            host: SIM_HOST.to_string(),
            rpc_port: TSERVER_RPC_BASE + index,
            admin_port: TSERVER_WEB_BASE + index,
            metrics_port: TSERVER_CQL_WEB_BASE + index,
        };
        self.tablet_servers.insert(
            info.rpc_port,
            SimNode {
                info: info.clone(),
                cql_port: TSERVER_CQL_BASE + index,
                registered_at,
                killed_at: None,
                dropped: false,
                ops: 0,
            },
        );
        info
    }

    fn move_percent(&self, now: Instant, config: &SimConfig) -> f64 {
        let Some(evacuation) = &self.evacuation else {
            return 100.0;
        };
        let percent = if config.move_duration.is_zero() {
            100.0
        } else {
            let elapsed = now.saturating_duration_since(evacuation.submitted_at);
            (elapsed.as_secs_f64() * 100.0 / config.move_duration.as_secs_f64()).min(100.0)
        };
        match config.faults.stall_move_at {
            Some(cap) => percent.min(cap),
            None => percent,
        }
    }

    fn apply_faults(&mut self, now: Instant, config: &SimConfig) {
        if !config.faults.drop_node_during_move || !self.dropped.is_empty() {
            return;
        }
        if self.evacuation.is_none() || self.move_percent(now, config) < 50.0 {
            return;
        }
        let targets = self
            .evacuation
            .as_ref()
            .map(|e| e.targets.clone())
            .unwrap_or_default();
        let victim = self
            .tablet_servers
            .values_mut()
            .find(|n| n.is_running() && !targets.contains(&n.info.rpc_address()));
        if let Some(node) = victim {
            node.dropped = true;
            let address = node.info.rpc_address();
            warn!(node = %address, "Injected fault: tablet server dropped out during move");
            self.dropped.push(address);
        }
    }

    fn live_count(&self, now: Instant, config: &SimConfig) -> usize {
        self.tablet_servers
            .values()
            .filter(|n| n.is_live(now, config.heartbeat_timeout))
            .count()
    }

    fn registered_running_count(&self, now: Instant) -> usize {
        self.tablet_servers
            .values()
            .filter(|n| n.is_running() && n.is_registered(now))
            .count()
    }

    fn is_balanced(&self, now: Instant, config: &SimConfig, expected: usize) -> bool {
        now >= self.balanced_after
            && self.registered_running_count(now) == expected
            && self.live_count(now, config) == expected
    }
}

/// Simulated cluster implementing every collaborator interface of the harness.
pub struct SimulatedCluster {
    config: SimConfig,
    created_at: Instant,
    state: RwLock<ClusterState>,
    fetches: AtomicU32,
    shutdown_calls: AtomicU32,
}

impl SimulatedCluster {
    /// Creates a cluster whose initial nodes are registered and balanced.
    pub fn new(config: SimConfig) -> Self {
        let now = Instant::now();
        let masters = (0..config.num_masters as u16)
            .map(|i| NodeInfo {
                id: NodeId::new(),
                role: NodeRole::Master,
                host: SIM_HOST.to_string(),
                rpc_port: MASTER_RPC_BASE + i,
                admin_port: MASTER_WEB_BASE + i,
                metrics_port: MASTER_WEB_BASE + i,
            })
            .collect();

        let mut state = ClusterState {
            masters,
            tablet_servers: BTreeMap::new(),
            next_index: 0,
            balanced_after: now,
            evacuation: None,
            kill_log: Vec::new(),
            dropped: Vec::new(),
            ops_cursor: 0,
            shut_down: false,
        };
        for _ in 0..config.num_tablet_servers {
            state.add_tablet_server(now);
        }

        info!(
            masters = config.num_masters,
            tablet_servers = config.num_tablet_servers,
            "Simulated cluster started"
        );

        Self {
            config,
            created_at: now,
            state: RwLock::new(state),
            fetches: AtomicU32::new(0),
            shutdown_calls: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Spreads `ops` over the registered, running tablet servers.
    ///
    /// Returns how many ops were served; zero when no node can serve them.
    pub fn record_ops(&self, ops: i64) -> i64 {
        let now = Instant::now();
        let mut state = self.state.write();
        if state.shut_down || ops <= 0 {
            return 0;
        }

        let cursor = state.ops_cursor;
        let mut serving: Vec<&mut SimNode> = state
            .tablet_servers
            .values_mut()
            .filter(|n| n.is_running() && n.is_registered(now))
            .collect();
        if serving.is_empty() {
            return 0;
        }

        let count = serving.len();
        let share = ops / count as i64;
        let remainder = (ops % count as i64) as usize;
        for (i, node) in serving.iter_mut().enumerate() {
            let extra = usize::from((i + count - cursor % count) % count < remainder);
            node.ops += share + extra as i64;
        }
        state.ops_cursor = (cursor + remainder) % count;
        ops
    }

    /// Live tablet servers as seen by the masters' failure detector.
    pub fn live_tablet_servers(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write();
        state.apply_faults(now, &self.config);
        state.live_count(now, &self.config)
    }

    /// Ops served by the tablet server on `rpc_port`.
    pub fn node_ops(&self, rpc_port: u16) -> Option<i64> {
        self.state.read().tablet_servers.get(&rpc_port).map(|n| n.ops)
    }

    pub fn total_ops(&self) -> i64 {
        self.state.read().tablet_servers.values().map(|n| n.ops).sum()
    }

    pub fn kill_log(&self) -> Vec<KillRecord> {
        self.state.read().kill_log.clone()
    }

    /// Nodes removed by the drop-during-move fault.
    pub fn dropped_nodes(&self) -> Vec<HostPort> {
        self.state.read().dropped.clone()
    }

    pub fn blacklist(&self) -> Option<BlacklistSet> {
        self.state.read().evacuation.as_ref().map(|e| e.targets.clone())
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.read().shut_down
    }

    pub fn shutdown_calls(&self) -> u32 {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Number of metrics fetches served or refused so far.
    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Metrics a node would publish on `metrics_port` right now.
    pub fn metrics_document(&self, metrics_port: u16) -> HarnessResult<MetricsDocument> {
        let endpoint = format!("{SIM_HOST}:{metrics_port}");
        let now = Instant::now();
        let mut state = self.state.write();
        if state.shut_down {
            return Err(HarnessError::unreachable(endpoint, "cluster is shut down"));
        }
        state.apply_faults(now, &self.config);

        if let Some(master) = state.masters.iter().find(|m| m.metrics_port == metrics_port) {
            let live = state.live_count(now, &self.config) as i64;
            let dead = state.tablet_servers.len() as i64 - live;
            return Ok(MetricsDocument::new(vec![
                MetricsEntity::new(
                    EntityKind::Server,
                    format!("yb.master.{}", master.rpc_port),
                    Vec::new(),
                ),
                MetricsEntity::new(
                    EntityKind::Cluster,
                    "yb.cluster",
                    vec![
                        MetricEntry::gauge("num_tablet_servers_dead", dead),
                        MetricEntry::gauge(self.config.live_nodes_metric.clone(), live),
                    ],
                ),
            ]));
        }

        let node = state
            .tablet_servers
            .values()
            .find(|n| n.info.metrics_port == metrics_port)
            .filter(|n| n.is_running())
            .ok_or_else(|| HarnessError::unreachable(&endpoint, "connection refused"))?;

        Ok(MetricsDocument::new(vec![MetricsEntity::new(
            EntityKind::Server,
            "yb.cqlserver",
            vec![MetricEntry::counter(self.config.op_count_metric.clone(), node.ops)],
        )]))
    }

    /// JSON payload a node would serve on `GET /metrics`.
    pub fn metrics_payload(&self, metrics_port: u16) -> HarnessResult<String> {
        let endpoint = format!("{SIM_HOST}:{metrics_port}");
        self.metrics_document(metrics_port)?
            .to_json()
            .map_err(|e| HarnessError::malformed(endpoint, e.to_string()))
    }

    fn ensure_running(&self, operation: &'static str) -> HarnessResult<()> {
        if self.state.read().shut_down {
            return Err(HarnessError::admin_rpc(operation, "cluster is shut down"));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsFetcher for SimulatedCluster {
    async fn fetch(&self, host: &str, port: u16) -> HarnessResult<MetricsDocument> {
        let endpoint = format!("{host}:{port}");
        let attempt = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.config.faults.unreachable_fetches {
            debug!(endpoint = %endpoint, attempt, "Injected fault: metrics unreachable");
            return Err(HarnessError::unreachable(endpoint, "connection refused (injected)"));
        }
        if host != SIM_HOST {
            return Err(HarnessError::unreachable(endpoint, "unknown host"));
        }

        // Served through the JSON form so the parser sees what HTTP would carry
        let payload = self.metrics_payload(port)?;
        MetricsDocument::from_json(&payload).map_err(|e| HarnessError::malformed(endpoint, e.to_string()))
    }
}

#[async_trait]
impl AdminClient for SimulatedCluster {
    async fn leader_admin_host_port(&self) -> HarnessResult<HostPort> {
        self.ensure_running("leader_admin_host_port")?;
        self.state
            .read()
            .masters
            .first()
            .map(NodeInfo::rpc_address)
            .ok_or_else(|| HarnessError::admin_rpc("leader_admin_host_port", "no masters"))
    }

    async fn wait_for_load_balance(&self, timeout: Duration, expected_servers: usize) -> HarnessResult<bool> {
        self.ensure_running("wait_for_load_balance")?;
        let deadline = Deadline::after(timeout);
        loop {
            let balanced = {
                let now = Instant::now();
                let mut state = self.state.write();
                state.apply_faults(now, &self.config);
                state.is_balanced(now, &self.config, expected_servers)
            };
            if balanced {
                debug!(expected_servers, elapsed = ?deadline.elapsed(), "Load balanced");
                return Ok(true);
            }
            if deadline.is_expired() {
                return Ok(false);
            }
            sleep(WAIT_STEP.min(deadline.remaining())).await;
        }
    }

    async fn load_move_completion(&self) -> HarnessResult<MoveCompletion> {
        self.ensure_running("load_move_completion")?;
        let now = Instant::now();
        let mut state = self.state.write();
        state.apply_faults(now, &self.config);
        Ok(MoveCompletion::new(state.move_percent(now, &self.config)))
    }

    async fn submit_blacklist(&self, hosts: Vec<HostPort>, on_data_plane: bool) -> HarnessResult<()> {
        self.ensure_running("submit_blacklist")?;
        if self.config.faults.reject_blacklist {
            return Err(HarnessError::admin_rpc(
                "submit_blacklist",
                "injected rejection: change config failed",
            ));
        }
        if !on_data_plane {
            return Err(HarnessError::admin_rpc(
                "submit_blacklist",
                "only data-plane blacklists are supported",
            ));
        }

        let mut state = self.state.write();
        if let Some(unknown) = hosts.iter().find(|h| {
            h.host != SIM_HOST
                || !state
                    .tablet_servers
                    .get(&h.port)
                    .is_some_and(SimNode::is_running)
        }) {
            return Err(HarnessError::admin_rpc(
                "submit_blacklist",
                format!("unknown tablet server {unknown}"),
            ));
        }

        info!(nodes = hosts.len(), "Blacklist accepted, starting data move");
        state.evacuation = Some(Evacuation {
            targets: hosts.into_iter().collect(),
            submitted_at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl ClusterControl for SimulatedCluster {
    async fn start_node(&self, spec: &NodeSpec) -> HarnessResult<NodeHandle> {
        self.ensure_running("start_node")?;
        let now = Instant::now();
        let mut state = self.state.write();
        let registered_at = now + self.config.startup_delay;
        let info = state.add_tablet_server(registered_at);
        state.balanced_after = registered_at + self.config.rebalance_delay;

        debug!(node = %info.rpc_address(), flags = ?spec.extra_flags, "Started tablet server");
        Ok(info.handle())
    }

    async fn kill_node_on_port(&self, rpc_port: u16) -> HarnessResult<()> {
        let now = Instant::now();
        let mut state = self.state.write();
        state.apply_faults(now, &self.config);
        let move_completion = MoveCompletion::new(state.move_percent(now, &self.config));
        let blacklisted = state
            .evacuation
            .as_ref()
            .is_some_and(|e| e.targets.contains(&HostPort::new(SIM_HOST, rpc_port)));

        let node = state
            .tablet_servers
            .get_mut(&rpc_port)
            .filter(|n| n.is_running())
            .ok_or_else(|| {
                HarnessError::admin_rpc("kill_node", format!("no running tablet server on port {rpc_port}"))
            })?;
        node.killed_at = Some(now);
        let address = node.info.rpc_address();

        debug!(node = %address, %move_completion, blacklisted, "Killed tablet server");
        state.kill_log.push(KillRecord {
            address,
            blacklisted,
            move_completion,
            at: now.saturating_duration_since(self.created_at),
        });
        Ok(())
    }

    async fn masters(&self) -> HarnessResult<Vec<NodeInfo>> {
        Ok(self.state.read().masters.clone())
    }

    async fn tablet_servers(&self) -> HarnessResult<Vec<NodeInfo>> {
        Ok(self
            .state
            .read()
            .tablet_servers
            .values()
            .filter(|n| n.is_running())
            .map(|n| n.info.clone())
            .collect())
    }

    async fn wait_for_tablet_servers(&self, count: usize, timeout: Duration) -> HarnessResult<bool> {
        let deadline = Deadline::after(timeout);
        loop {
            let registered = self.state.read().registered_running_count(Instant::now());
            if registered >= count {
                return Ok(true);
            }
            if deadline.is_expired() {
                return Ok(false);
            }
            sleep(WAIT_STEP.min(deadline.remaining())).await;
        }
    }

    fn heartbeat_timeout(&self) -> Duration {
        self.config.heartbeat_timeout
    }

    async fn contact_points(&self) -> HarnessResult<Vec<HostPort>> {
        let now = Instant::now();
        Ok(self
            .state
            .read()
            .tablet_servers
            .values()
            .filter(|n| n.is_running() && n.is_registered(now))
            .map(|n| HostPort::new(n.info.host.clone(), n.cql_port))
            .collect())
    }

    async fn shutdown(&self) -> HarnessResult<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut state = self.state.write();
        if state.shut_down {
            return Ok(());
        }
        for node in state.tablet_servers.values_mut().filter(|n| n.killed_at.is_none()) {
            node.killed_at = Some(now);
        }
        state.shut_down = true;
        info!("Simulated cluster shut down");
        Ok(())
    }
}
