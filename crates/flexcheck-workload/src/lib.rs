//! Lifecycle control for the background workload generator.
//!
//! The generator runs on its own tokio task. The controller only starts it,
//! signals it to stop, joins it, and reads its counters.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use flexcheck_core::{
    HarnessError, HarnessResult, WorkloadCounters, WorkloadFactory, WorkloadGenerator, WorkloadSpec,
};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Failure state shared between the controller and the workload task.
#[derive(Debug, Default)]
struct FailureState {
    failed: AtomicBool,
    reason: OnceLock<String>,
}

impl FailureState {
    fn record(&self, reason: String) {
        // First reason wins
        let _ = self.reason.set(reason);
        self.failed.store(true, Ordering::SeqCst);
    }
}

/// Handle to a running workload.
pub struct WorkloadController {
    spec: WorkloadSpec,
    generator: Arc<dyn WorkloadGenerator>,
    failure: Arc<FailureState>,
    ops_high_water: AtomicI64,
    handle: Option<JoinHandle<()>>,
}

impl WorkloadController {
    /// Builds a generator for `spec` and runs it on a new task.
    pub fn start(factory: &dyn WorkloadFactory, spec: WorkloadSpec) -> HarnessResult<Self> {
        let generator = factory.create(&spec)?;
        let failure = Arc::new(FailureState::default());

        info!(
            workload = %spec.workload_name,
            args = ?spec.to_args(),
            "Starting workload"
        );

        let task_generator = Arc::clone(&generator);
        let task_failure = Arc::clone(&failure);
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(task_generator.run()).catch_unwind().await {
                Ok(Ok(())) => debug!("Workload run returned"),
                Ok(Err(e)) => {
                    error!("Workload failed: {}", e);
                    task_failure.record(e.to_string());
                }
                Err(_) => {
                    error!("Workload task panicked");
                    task_failure.record("workload task panicked".to_string());
                }
            }
        });

        Ok(Self {
            spec,
            generator,
            failure,
            ops_high_water: AtomicI64::new(0),
            handle: Some(handle),
        })
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// Signals the generator to stop. Does not wait.
    pub fn stop(&self) {
        info!(workload = %self.spec.workload_name, "Requesting workload stop");
        self.generator.request_stop();
    }

    /// Waits for the workload task to finish, without bound.
    pub async fn join(&mut self) -> HarnessResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .await
            .map_err(|e| HarnessError::workload_failure(format!("workload task did not complete: {e}")))
    }

    /// Waits at most `timeout` for the workload task to finish.
    ///
    /// On expiry the task is aborted and `WorkloadFailure` is returned.
    pub async fn join_timeout(&mut self, timeout: Duration) -> HarnessResult<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HarnessError::workload_failure(format!(
                "workload task did not complete: {e}"
            ))),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Workload did not stop in time, aborting");
                handle.abort();
                Err(HarnessError::workload_failure(format!(
                    "workload did not stop within {timeout:?}"
                )))
            }
        }
    }

    /// Operations completed so far. Never decreases between calls.
    pub fn current_ops(&self) -> i64 {
        let reported = self.generator.ops_completed();
        let previous = self.ops_high_water.fetch_max(reported, Ordering::SeqCst);
        previous.max(reported)
    }

    /// True once the generator reported a failure or its task errored.
    /// The flag latches: a generator clearing its own flag later does not
    /// reset it.
    pub fn has_failures(&self) -> bool {
        if self.failure.failed.load(Ordering::SeqCst) {
            return true;
        }
        if self.generator.has_failures() {
            warn!(workload = %self.spec.workload_name, "Workload generator reported failures");
            self.failure.failed.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Why the workload task failed, if it did.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure.reason.get().cloned()
    }

    pub fn exception_count(&self) -> i64 {
        self.generator.exception_count()
    }

    pub fn counters(&self) -> WorkloadCounters {
        WorkloadCounters {
            ops_completed: self.current_ops(),
            exception_count: self.exception_count(),
            failed: self.has_failures(),
        }
    }

    /// Whether the workload task has exited (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for WorkloadController {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            if !handle.is_finished() {
                self.generator.request_stop();
                handle.abort();
                debug!(workload = %self.spec.workload_name, "Workload task aborted on drop");
            }
        }
    }
}
