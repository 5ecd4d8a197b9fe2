//! Expand/shrink scenario state machine.
//!
//! The orchestrator runs one phase at a time on the caller's task. Only the
//! workload runs concurrently. Whatever the outcome, teardown stops the
//! workload and shuts the cluster down before the report is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flexcheck_convergence::{ConvergenceWaiter, Observation};
use flexcheck_core::{
    AdminClient, ClusterControl, ClusterView, Deadline, HarnessConfig, HarnessError, HarnessResult,
    MoveCompletion, RunId, WorkloadFactory, WorkloadSpec,
};
use flexcheck_metrics::MetricsFetcher;
use flexcheck_sim::{SimWorkloadConfig, SimulatedCluster, SimulatedWorkloadFactory};
use flexcheck_topology::TopologyMutator;
use flexcheck_workload::WorkloadController;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::error::ScenarioError;
use crate::phase::Phase;
use crate::predicates::{guard_workload, ops_at_least, ClusterProbe};
use crate::report::{Outcome, PhaseTiming, ScenarioReport};

/// External systems the scenario drives.
#[derive(Clone)]
pub struct Collaborators {
    pub control: Arc<dyn ClusterControl>,
    pub admin: Arc<dyn AdminClient>,
    pub metrics: Arc<dyn MetricsFetcher>,
    pub workload: Arc<dyn WorkloadFactory>,
}

impl Collaborators {
    /// Every collaborator backed by one simulated cluster.
    pub fn simulated(cluster: Arc<SimulatedCluster>, workload: SimWorkloadConfig) -> Self {
        let factory = SimulatedWorkloadFactory::new(Arc::clone(&cluster), workload);
        Self {
            control: cluster.clone(),
            admin: cluster.clone(),
            metrics: cluster,
            workload: Arc::new(factory),
        }
    }
}

pub struct ScenarioOrchestrator {
    config: HarnessConfig,
    control: Arc<dyn ClusterControl>,
    workload_factory: Arc<dyn WorkloadFactory>,
    probe: ClusterProbe,
    topology: TopologyMutator,
    waiter: ConvergenceWaiter,

    run_id: RunId,
    phase: Phase,
    started: Instant,
    phase_started: Instant,
    timings: Vec<PhaseTiming>,

    workload: Option<WorkloadController>,
    original_view: Option<ClusterView>,
    total_ops: i64,
}

impl ScenarioOrchestrator {
    pub fn new(config: HarnessConfig, collaborators: Collaborators) -> HarnessResult<Self> {
        config.validate()?;
        let Collaborators {
            control,
            admin,
            metrics,
            workload,
        } = collaborators;

        let now = Instant::now();
        Ok(Self {
            probe: ClusterProbe::new(
                Arc::clone(&control),
                Arc::clone(&admin),
                metrics,
                config.metrics.clone(),
            ),
            topology: TopologyMutator::new(Arc::clone(&control), admin),
            waiter: ConvergenceWaiter::new(config.timeouts.poll_interval()),
            control,
            workload_factory: workload,
            config,
            run_id: RunId::new(),
            phase: Phase::Idle,
            started: now,
            phase_started: now,
            timings: Vec::new(),
            workload: None,
            original_view: None,
            total_ops: 0,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs every phase, then tears down. Never skips teardown.
    pub async fn run(mut self) -> ScenarioReport {
        let started_at = Utc::now();
        self.started = Instant::now();
        self.phase_started = self.started;
        info!(
            run_id = %self.run_id,
            tablet_servers = self.config.cluster.num_tablet_servers,
            workload = %self.config.workload.name,
            "Starting cluster expand/shrink scenario"
        );

        let error = match self.execute().await {
            Ok(()) => None,
            Err(source) => {
                let failed_in = self.phase;
                self.close_phase();
                self.phase = Phase::Failed;
                error!(phase = %failed_in, "Scenario aborted: {}", source);
                Some(ScenarioError::new(failed_in, self.started.elapsed(), source))
            }
        };

        let teardown_errors = self.teardown().await;

        let counters = self
            .workload
            .as_ref()
            .map(WorkloadController::counters)
            .unwrap_or_default();
        let outcome = match &error {
            None => Outcome::Passed,
            Some(e) => Outcome::Failed {
                phase: e.phase,
                message: e.source.to_string(),
            },
        };

        let report = ScenarioReport {
            run_id: self.run_id,
            started_at,
            elapsed: self.started.elapsed(),
            phases: std::mem::take(&mut self.timings),
            final_phase: self.phase,
            total_ops: counters.ops_completed.max(self.total_ops),
            exceptions: counters.exception_count,
            outcome,
            teardown_errors,
            error,
        };
        report.log_summary();
        report
    }

    async fn execute(&mut self) -> HarnessResult<()> {
        let n = self.config.cluster.num_tablet_servers;
        let increment = self.config.workload.ops_increment;

        self.advance(Phase::WorkloadStarting)?;
        self.start_workload().await?;

        self.advance(Phase::InitialTrafficWait)?;
        self.total_ops = self.wait_for_ops(increment).await?;

        self.advance(Phase::Expanding)?;
        let original = self.topology.snapshot().await?;
        if original.num_tablet_servers() != n {
            return Err(HarnessError::assertion(format!(
                "expected {n} tablet servers before expansion, found {}",
                original.num_tablet_servers()
            )));
        }
        self.original_view = Some(original);
        self.topology.add_nodes(n).await?;
        self.topology
            .wait_for_nodes(2 * n, self.config.cluster.startup_timeout())
            .await?;

        self.advance(Phase::PostExpandVerify)?;
        self.wait_for_load_balance(2 * n).await?;
        self.total_ops = self.wait_for_ops(self.total_ops + increment).await?;
        guard_workload(self.workload()?)?;
        self.check_node_ops(0).await?;
        self.check_live(2 * n).await?;
        info!("Cluster expand done");

        self.advance(Phase::Blacklisting)?;
        let targets = self.original()?.blacklist_set();
        self.topology.blacklist(targets, true).await?;

        self.advance(Phase::MoveWait)?;
        self.wait_for_move(2 * n).await?;

        self.advance(Phase::Killing)?;
        let victims = self.original()?.tablet_server_handles();
        for handle in &victims {
            self.topology.kill_node(handle).await?;
        }

        self.advance(Phase::HeartbeatExpiryWait)?;
        let heartbeat_expiry = self.control.heartbeat_timeout() * 2;
        self.guarded_sleep(heartbeat_expiry).await?;

        self.advance(Phase::PostShrinkVerify)?;
        self.check_live(n).await?;
        self.topology.clear_blacklist();
        info!("Cluster shrink done");
        self.total_ops = self.wait_for_ops(self.total_ops + increment).await?;
        self.total_ops = self.wait_for_ops(self.total_ops + increment).await?;
        let exceptions = self.workload()?.exception_count();
        if exceptions != 0 {
            return Err(HarnessError::assertion(format!(
                "workload recorded {exceptions} exceptions"
            )));
        }
        self.check_node_ops(increment / n as i64).await?;
        self.guarded_sleep(heartbeat_expiry).await?;
        self.check_live(n).await?;
        guard_workload(self.workload()?)?;

        self.advance(Phase::Done)
    }

    fn advance(&mut self, to: Phase) -> HarnessResult<()> {
        if self.phase.next() != Some(to) {
            return Err(HarnessError::assertion(format!(
                "illegal phase transition {} -> {}",
                self.phase, to
            )));
        }
        self.close_phase();
        info!(from = %self.phase, to = %to, elapsed_ms = self.started.elapsed().as_millis() as u64, "Phase transition");
        self.phase = to;
        self.phase_started = Instant::now();
        Ok(())
    }

    fn close_phase(&mut self) {
        if self.phase != Phase::Idle && !self.phase.is_terminal() {
            self.timings.push(PhaseTiming {
                phase: self.phase,
                elapsed: self.phase_started.elapsed(),
            });
        }
    }

    fn workload(&self) -> HarnessResult<&WorkloadController> {
        self.workload
            .as_ref()
            .ok_or_else(|| HarnessError::assertion("workload has not been started"))
    }

    fn original(&self) -> HarnessResult<&ClusterView> {
        self.original_view
            .as_ref()
            .ok_or_else(|| HarnessError::assertion("no pre-expansion snapshot"))
    }

    async fn start_workload(&mut self) -> HarnessResult<()> {
        let spec = WorkloadSpec {
            workload_name: self.config.workload.name.clone(),
            contact_points: self.control.contact_points().await?,
            verbose: self.config.workload.verbose,
        };
        self.workload = Some(WorkloadController::start(self.workload_factory.as_ref(), spec)?);
        Ok(())
    }

    /// Waits for the workload to reach `target` ops and returns the ops seen.
    async fn wait_for_ops(&self, target: i64) -> HarnessResult<i64> {
        let workload = self.workload()?;
        self.waiter
            .wait_until(
                &format!("workload ops >= {target}"),
                || async move { ops_at_least(workload, target) },
                self.config.timeouts.wait_for_ops(),
            )
            .await?;

        let ops = workload.current_ops();
        info!(ops, expected = target, "Workload reached op target");
        Ok(ops)
    }

    async fn wait_for_load_balance(&self, expected: usize) -> HarnessResult<()> {
        let workload = self.workload()?;
        let probe = &self.probe;
        self.waiter
            .wait_until(
                &format!("load balanced over {expected} tablet servers"),
                || async move {
                    guard_workload(workload)?;
                    probe.load_balanced(expected).await
                },
                self.config.timeouts.load_balance(),
            )
            .await?;
        Ok(())
    }

    /// Live count is exactly `expected`, retried while the leader's metrics
    /// endpoint is unreachable. A different count fails at once.
    async fn check_live(&self, expected: usize) -> HarnessResult<()> {
        let workload = self.workload()?;
        let probe = &self.probe;
        self.waiter
            .wait_until(
                &format!("{expected} live tablet servers"),
                || async move {
                    guard_workload(workload)?;
                    probe.live_tablet_servers_equal(expected).await
                },
                self.config.timeouts.metrics_check(),
            )
            .await?;
        Ok(())
    }

    /// Per-node op floor, retried while a node's metrics endpoint is
    /// unreachable. A node below the floor fails at once.
    async fn check_node_ops(&self, min_ops: i64) -> HarnessResult<()> {
        let workload = self.workload()?;
        let probe = &self.probe;
        self.waiter
            .wait_until(
                &format!("every tablet server >= {min_ops} ops"),
                || async move {
                    guard_workload(workload)?;
                    probe.verify_node_ops(min_ops).await
                },
                self.config.timeouts.metrics_check(),
            )
            .await?;
        Ok(())
    }

    /// Polls move completion until 100%, re-checking the live count each time.
    async fn wait_for_move(&mut self, expected_live: usize) -> HarnessResult<()> {
        let last_seen: Mutex<Option<MoveCompletion>> = Mutex::new(None);
        let result = {
            let workload = self.workload()?;
            let probe = &self.probe;
            let last_seen = &last_seen;
            self.waiter
                .wait_until(
                    "move completion == 100%",
                    || async move {
                        guard_workload(workload)?;
                        let completion = probe.move_progress(expected_live).await?;
                        *last_seen.lock() = Some(completion);
                        Ok(Observation::when(completion.is_complete(), completion))
                    },
                    self.config.timeouts.cluster_move(),
                )
                .await
        };

        if let Some(completion) = last_seen.into_inner() {
            self.topology.record_move_completion(completion);
        }
        result.map(|_| ())
    }

    /// Sleeps for `duration`, checking workload health every poll interval.
    async fn guarded_sleep(&self, duration: Duration) -> HarnessResult<()> {
        let workload = self.workload()?;
        let deadline = Deadline::after(duration);
        info!(duration_ms = duration.as_millis() as u64, "Waiting for heartbeats to expire");
        while !deadline.is_expired() {
            guard_workload(workload)?;
            sleep(self.waiter.poll_interval().min(deadline.remaining())).await;
        }
        guard_workload(workload)
    }

    async fn teardown(&mut self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(workload) = self.workload.as_mut() {
            workload.stop();
            if let Err(e) = workload.join_timeout(self.config.workload.join_timeout()).await {
                warn!("Workload teardown failed: {}", e);
                errors.push(e.to_string());
            }
        }

        if let Err(e) = self.control.shutdown().await {
            warn!("Cluster shutdown failed: {}", e);
            errors.push(e.to_string());
        }

        info!(errors = errors.len(), "Teardown complete");
        errors
    }
}
