//! Workload generator that drives traffic into a [`SimulatedCluster`].

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flexcheck_core::{HarnessError, HarnessResult, WorkloadFactory, WorkloadGenerator, WorkloadSpec};
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::cluster::SimulatedCluster;
use crate::config::SimWorkloadConfig;

pub struct SimulatedWorkload {
    cluster: Arc<SimulatedCluster>,
    config: SimWorkloadConfig,
    spec: WorkloadSpec,
    ops: AtomicI64,
    exceptions: AtomicI64,
    failed: AtomicBool,
    stop_requested: AtomicBool,
}

impl SimulatedWorkload {
    pub fn new(cluster: Arc<SimulatedCluster>, config: SimWorkloadConfig, spec: WorkloadSpec) -> Self {
        Self {
            cluster,
            config,
            spec,
            ops: AtomicI64::new(0),
            exceptions: AtomicI64::new(0),
            failed: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadGenerator for SimulatedWorkload {
    async fn run(&self) -> HarnessResult<()> {
        info!(
            workload = %self.spec.workload_name,
            nodes = %self.spec.contact_points_string(),
            "Simulated workload running"
        );

        while !self.stop_requested() {
            sleep(self.config.tick).await;

            let served = self.cluster.record_ops(self.config.ops_per_tick);
            if served == 0 {
                self.exceptions.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            let total = self.ops.fetch_add(served, Ordering::SeqCst) + served;

            if self.config.exceptions_after_ops.is_some_and(|limit| total >= limit) {
                self.exceptions.fetch_add(1, Ordering::SeqCst);
            }
            if self.config.fail_after_ops.is_some_and(|limit| total >= limit) {
                self.failed.store(true, Ordering::SeqCst);
                return Err(HarnessError::workload_failure(format!(
                    "injected failure after {total} ops"
                )));
            }
        }

        debug!(ops = self.ops_completed(), "Simulated workload stopped");
        Ok(())
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn ops_completed(&self) -> i64 {
        self.ops.load(Ordering::SeqCst)
    }

    fn has_failures(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn exception_count(&self) -> i64 {
        self.exceptions.load(Ordering::SeqCst)
    }
}

/// Builds [`SimulatedWorkload`]s against one cluster and remembers them.
pub struct SimulatedWorkloadFactory {
    cluster: Arc<SimulatedCluster>,
    config: SimWorkloadConfig,
    created: Mutex<Vec<Arc<SimulatedWorkload>>>,
}

impl SimulatedWorkloadFactory {
    pub fn new(cluster: Arc<SimulatedCluster>, config: SimWorkloadConfig) -> Self {
        Self {
            cluster,
            config,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Every workload built so far, oldest first.
    pub fn created(&self) -> Vec<Arc<SimulatedWorkload>> {
        self.created.lock().clone()
    }
}

impl WorkloadFactory for SimulatedWorkloadFactory {
    fn create(&self, spec: &WorkloadSpec) -> HarnessResult<Arc<dyn WorkloadGenerator>> {
        if spec.contact_points.is_empty() {
            return Err(HarnessError::Config(
                "workload needs at least one contact point".to_string(),
            ));
        }
        let workload = Arc::new(SimulatedWorkload::new(
            Arc::clone(&self.cluster),
            self.config.clone(),
            spec.clone(),
        ));
        self.created.lock().push(Arc::clone(&workload));
        Ok(workload)
    }
}
