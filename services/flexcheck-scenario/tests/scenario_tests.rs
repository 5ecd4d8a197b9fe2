//! End-to-end expand/shrink scenarios against the simulated cluster.
//!
//! All tests run on tokio's paused clock, so minutes of scenario time pass
//! instantly and every timing is deterministic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flexcheck_core::{
    ClusterControl, HarnessConfig, HarnessError, HarnessResult, HostPort, NodeHandle, NodeInfo,
    NodeSpec,
};
use flexcheck_scenario::{Collaborators, Outcome, Phase, ScenarioOrchestrator, ScenarioReport};
use flexcheck_sim::{FaultPlan, SimConfig, SimWorkloadConfig, SimulatedCluster, SimulatedWorkloadFactory};

struct Rig {
    cluster: Arc<SimulatedCluster>,
    factory: Arc<SimulatedWorkloadFactory>,
    collaborators: Collaborators,
}

fn rig(config: &HarnessConfig, faults: FaultPlan, workload: SimWorkloadConfig) -> Rig {
    rig_with(SimConfig::from_harness(config).with_faults(faults), workload)
}

fn rig_with(sim: SimConfig, workload: SimWorkloadConfig) -> Rig {
    let cluster = Arc::new(SimulatedCluster::new(sim));
    let factory = Arc::new(SimulatedWorkloadFactory::new(Arc::clone(&cluster), workload));
    let collaborators = Collaborators {
        control: cluster.clone(),
        admin: cluster.clone(),
        metrics: cluster.clone(),
        workload: factory.clone(),
    };
    Rig {
        cluster,
        factory,
        collaborators,
    }
}

async fn run(config: HarnessConfig, rig: &Rig) -> ScenarioReport {
    ScenarioOrchestrator::new(config, rig.collaborators.clone())
        .unwrap()
        .run()
        .await
}

fn assert_torn_down(rig: &Rig) {
    assert_eq!(rig.cluster.shutdown_calls(), 1);
    for workload in rig.factory.created() {
        assert!(workload.stop_requested());
    }
}

#[tokio::test(start_paused = true)]
async fn test_expand_then_shrink_passes() {
    let config = HarnessConfig::default();
    let rig = rig(&config, FaultPlan::default(), SimWorkloadConfig::default());

    let report = run(config, &rig).await;

    assert!(report.passed(), "scenario failed: {:?}", report.error);
    assert_eq!(report.final_phase, Phase::Done);
    assert_eq!(report.outcome, Outcome::Passed);
    assert_eq!(report.exceptions, 0);
    assert!(report.total_ops >= 4 * 10_000);
    assert!(report.teardown_errors.is_empty());

    let phases: Vec<Phase> = report.phases.iter().map(|t| t.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::WorkloadStarting,
            Phase::InitialTrafficWait,
            Phase::Expanding,
            Phase::PostExpandVerify,
            Phase::Blacklisting,
            Phase::MoveWait,
            Phase::Killing,
            Phase::HeartbeatExpiryWait,
            Phase::PostShrinkVerify,
        ]
    );

    // Twice the heartbeat timeout
    assert_eq!(
        report.phase_elapsed(Phase::HeartbeatExpiryWait),
        Some(Duration::from_secs(10))
    );
    let move_wait = report.phase_elapsed(Phase::MoveWait).unwrap();
    assert!(move_wait >= Duration::from_secs(20) && move_wait <= Duration::from_secs(21));

    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_only_blacklisted_nodes_are_killed_after_full_move() {
    let config = HarnessConfig::default();
    let rig = rig(&config, FaultPlan::default(), SimWorkloadConfig::default());
    let originals: Vec<HostPort> = rig
        .cluster
        .tablet_servers()
        .await
        .unwrap()
        .iter()
        .map(NodeInfo::rpc_address)
        .collect();

    let report = run(config, &rig).await;
    assert!(report.passed());

    let kills = rig.cluster.kill_log();
    assert_eq!(kills.len(), 3);
    for kill in &kills {
        assert!(kill.blacklisted);
        assert!(kill.move_completion.is_complete(), "killed at {}", kill.move_completion);
        assert!(originals.contains(&kill.address));
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_nodes_carry_traffic_after_shrink() {
    let config = HarnessConfig::default();
    let rig = rig(&config, FaultPlan::default(), SimWorkloadConfig::default());

    let report = run(config, &rig).await;
    assert!(report.passed());

    let killed: Vec<HostPort> = rig.cluster.kill_log().into_iter().map(|k| k.address).collect();
    for port in 9103..9106 {
        assert!(!killed.contains(&HostPort::new("127.0.0.1", port)));
        assert!(rig.cluster.node_ops(port).unwrap() >= 10_000 / 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_node_cluster() {
    let mut config = HarnessConfig::default();
    config.cluster.num_tablet_servers = 2;
    config.workload.ops_increment = 4_000;
    let rig = rig(&config, FaultPlan::default(), SimWorkloadConfig::default());

    let report = run(config, &rig).await;

    assert!(report.passed(), "scenario failed: {:?}", report.error);
    assert_eq!(rig.cluster.kill_log().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_early_workload_failure_aborts_within_one_poll() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan::default(),
        SimWorkloadConfig {
            fail_after_ops: Some(3_000),
            ..SimWorkloadConfig::default()
        },
    );

    let report = run(config, &rig).await;

    assert_eq!(report.final_phase, Phase::Failed);
    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::InitialTrafficWait);
    assert!(matches!(err.source, HarnessError::WorkloadFailure { .. }));
    // Fails at 0.5s; the next poll is at 1s
    assert!(err.elapsed <= Duration::from_millis(1_500), "took {:?}", err.elapsed);
    assert!(rig.cluster.kill_log().is_empty());
    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_workload_failure_during_move_wait() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan::default(),
        SimWorkloadConfig {
            fail_after_ops: Some(40_000),
            ..SimWorkloadConfig::default()
        },
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::MoveWait);
    assert!(matches!(err.source, HarnessError::WorkloadFailure { .. }));
    // 40k ops are reached at 6.7s
    assert!(err.elapsed <= Duration::from_millis(7_700), "took {:?}", err.elapsed);
    assert!(rig.cluster.kill_log().is_empty());
    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_blacklist_rejection_fails_in_blacklisting() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan {
            reject_blacklist: true,
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::Blacklisting);
    assert!(matches!(err.source, HarnessError::AdminRpc { .. }));
    match &report.outcome {
        Outcome::Failed { phase, message } => {
            assert_eq!(*phase, Phase::Blacklisting);
            assert!(message.contains("submit_blacklist"));
        }
        Outcome::Passed => panic!("rejection must fail the scenario"),
    }
    assert!(rig.cluster.kill_log().is_empty());
    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_node_drop_during_move_fails_in_move_wait() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan {
            drop_node_during_move: true,
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::MoveWait);
    match &err.source {
        HarnessError::AssertionViolation { message } => assert!(message.contains("found 5")),
        other => panic!("expected assertion violation, got {other:?}"),
    }
    assert_eq!(rig.cluster.dropped_nodes().len(), 1);
    assert!(rig.cluster.kill_log().is_empty());
    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_move_times_out_without_killing() {
    let mut config = HarnessConfig::default();
    config.timeouts.cluster_move_ms = 30_000;
    let rig = rig(
        &config,
        FaultPlan {
            stall_move_at: Some(60.0),
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::MoveWait);
    match &err.source {
        HarnessError::ConvergenceTimeout {
            last_observed,
            timeout,
            ..
        } => {
            assert_eq!(last_observed, "60.0%");
            assert_eq!(*timeout, Duration::from_secs(30));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(rig.cluster.kill_log().is_empty());
    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_slow_rebalance_times_out_after_expansion() {
    let config = HarnessConfig::default();
    let rig = rig_with(
        SimConfig {
            rebalance_delay: Duration::from_secs(45),
            ..SimConfig::from_harness(&config)
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::PostExpandVerify);
    assert!(matches!(err.source, HarnessError::ConvergenceTimeout { .. }));
    assert!(rig.cluster.blacklist().is_none());
    assert_eq!(rig.cluster.shutdown_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_up_front() {
    let mut config = HarnessConfig::default();
    config.timeouts.poll_interval_ms = 0;
    let rig = rig(&config, FaultPlan::default(), SimWorkloadConfig::default());

    let result = ScenarioOrchestrator::new(config, rig.collaborators.clone());

    assert!(matches!(result, Err(HarnessError::Config(_))));
    assert_eq!(rig.cluster.shutdown_calls(), 0);
}

/// Delegates to the simulator but fails to shut down.
struct StubbornCluster(Arc<SimulatedCluster>);

#[async_trait]
impl ClusterControl for StubbornCluster {
    async fn start_node(&self, spec: &NodeSpec) -> HarnessResult<NodeHandle> {
        self.0.start_node(spec).await
    }

    async fn kill_node_on_port(&self, rpc_port: u16) -> HarnessResult<()> {
        self.0.kill_node_on_port(rpc_port).await
    }

    async fn masters(&self) -> HarnessResult<Vec<NodeInfo>> {
        self.0.masters().await
    }

    async fn tablet_servers(&self) -> HarnessResult<Vec<NodeInfo>> {
        self.0.tablet_servers().await
    }

    async fn wait_for_tablet_servers(&self, count: usize, timeout: Duration) -> HarnessResult<bool> {
        self.0.wait_for_tablet_servers(count, timeout).await
    }

    fn heartbeat_timeout(&self) -> Duration {
        self.0.heartbeat_timeout()
    }

    async fn contact_points(&self) -> HarnessResult<Vec<HostPort>> {
        self.0.contact_points().await
    }

    async fn shutdown(&self) -> HarnessResult<()> {
        Err(HarnessError::admin_rpc("shutdown", "master refused to stop"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_teardown_errors_do_not_mask_outcome() {
    let config = HarnessConfig::default();
    let mut rig = rig(&config, FaultPlan::default(), SimWorkloadConfig::default());
    rig.collaborators.control = Arc::new(StubbornCluster(Arc::clone(&rig.cluster)));

    let report = run(config, &rig).await;

    assert!(report.passed(), "scenario failed: {:?}", report.error);
    assert_eq!(report.teardown_errors.len(), 1);
    assert!(report.teardown_errors[0].contains("master refused to stop"));
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan {
            reject_blacklist: true,
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;
    let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    assert_eq!(value["final_phase"], "failed");
    assert_eq!(value["outcome"]["status"], "failed");
    assert_eq!(value["outcome"]["phase"], "blacklisting");
    assert_eq!(value["phases"].as_array().unwrap().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_brief_metrics_outage_is_retried() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan {
            unreachable_fetches: 3,
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    assert!(report.passed(), "scenario failed: {:?}", report.error);
    // Load balance settles after 3s, then three refused reads cost a poll each
    let post_expand = report.phase_elapsed(Phase::PostExpandVerify).unwrap();
    assert!(post_expand >= Duration::from_secs(6), "took {post_expand:?}");
    assert!(rig.cluster.fetch_count() > 3);
    assert_eq!(rig.cluster.kill_log().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_single_refused_metrics_read_does_not_fail_run() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan {
            unreachable_fetches: 1,
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    assert!(report.passed(), "scenario failed: {:?}", report.error);
    assert_eq!(report.final_phase, Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_outage_beyond_budget_times_out() {
    let mut config = HarnessConfig::default();
    config.timeouts.metrics_check_ms = 5_000;
    let rig = rig(
        &config,
        FaultPlan {
            unreachable_fetches: 1_000,
            ..FaultPlan::default()
        },
        SimWorkloadConfig::default(),
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::PostExpandVerify);
    match &err.source {
        HarnessError::ConvergenceTimeout {
            last_observed,
            timeout,
            ..
        } => {
            assert!(last_observed.starts_with("transient error"), "{last_observed}");
            assert_eq!(*timeout, Duration::from_secs(5));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(rig.cluster.blacklist().is_none());
    assert_torn_down(&rig);
}

#[tokio::test(start_paused = true)]
async fn test_workload_exceptions_fail_shrink_verification() {
    let config = HarnessConfig::default();
    let rig = rig(
        &config,
        FaultPlan::default(),
        SimWorkloadConfig {
            exceptions_after_ops: Some(200_000),
            ..SimWorkloadConfig::default()
        },
    );

    let report = run(config, &rig).await;

    let err = report.error.as_ref().unwrap();
    assert_eq!(err.phase, Phase::PostShrinkVerify);
    match &err.source {
        HarnessError::AssertionViolation { message } => {
            assert!(message.starts_with("workload recorded"), "{message}");
            assert!(message.ends_with("exceptions"), "{message}");
        }
        other => panic!("expected assertion violation, got {other:?}"),
    }
    assert!(report.exceptions > 0);
    // The shrink itself completed before the check
    assert_eq!(rig.cluster.kill_log().len(), 3);
    assert!(matches!(report.outcome, Outcome::Failed { phase: Phase::PostShrinkVerify, .. }));
    assert_torn_down(&rig);
}
