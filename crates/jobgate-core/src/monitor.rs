//! Per-job background monitor.
//!
//! A monitor polls the backend until the execution unit reaches a terminal
//! state, collects its output, deletes the job's backend objects and finally
//! writes the terminal outcome into the job store.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::{BackendError, ExecutionBackend, UnitStatus};
use crate::identity::{JobId, ResourceNames};
use crate::job::{JobOutcome, JobStatus};
use crate::latency::LatencyLog;
use crate::store::JobStore;

/// Error recorded when the backend reports the unit itself failed.
pub const EXECUTION_FAILED: &str = "execution failed";

/// Error recorded when a monitor is cancelled before the unit finished.
pub const MONITOR_CANCELLED: &str = "monitoring cancelled";

/// Polling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Delay between the first two status queries.
    pub poll_interval: Duration,
    /// Upper bound for the delay once backoff kicks in.
    pub max_poll_interval: Duration,
    /// Multiplier applied to the delay after every non-terminal poll.
    /// `1.0` keeps a fixed interval.
    pub backoff_factor: f64,
    /// Give up and fail the job after this long. `None` polls forever.
    pub max_duration: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_duration: None,
        }
    }
}

impl MonitorConfig {
    /// Delay to use after `current`.
    ///
    /// Never exceeds the ceiling, whatever the factor; products that do not
    /// fit a [`Duration`] saturate at the ceiling.
    pub fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff_factor.is_nan() || self.backoff_factor <= 1.0 {
            return current;
        }
        let cap = self.max_poll_interval.max(self.poll_interval);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .map_or(cap, |d| d.min(cap))
    }
}

/// How the poll phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Observation {
    Succeeded,
    ExecutionFailed,
    PollFailed(String),
    TimedOut(Duration),
    Cancelled,
}

/// Observes one job to completion.
pub struct Monitor {
    job_id: JobId,
    names: ResourceNames,
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn JobStore>,
    config: MonitorConfig,
    latency: Option<Arc<LatencyLog>>,
}

impl Monitor {
    pub fn new(
        job_id: JobId,
        backend: Arc<dyn ExecutionBackend>,
        store: Arc<dyn JobStore>,
        config: MonitorConfig,
    ) -> Self {
        let names = job_id.resource_names();
        Self {
            job_id,
            names,
            backend,
            store,
            config,
            latency: None,
        }
    }

    pub fn with_latency_log(mut self, log: Option<Arc<LatencyLog>>) -> Self {
        self.latency = log;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Drive the job to a terminal state.
    ///
    /// Cleanup of the backend objects always runs, even if observing the job
    /// panics, and its failures never reach the returned outcome.
    pub async fn run(self, cancel: CancellationToken) -> JobOutcome {
        info!(unit = %self.names.unit, "monitoring job");

        let outcome = match AssertUnwindSafe(self.observe_and_collect(&cancel))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("monitor panicked while observing job");
                JobOutcome::failed("internal error while monitoring job")
            }
        };

        self.cleanup().await;

        match self.store.update(&self.job_id, outcome.clone()).await {
            Ok(record) => {
                info!(status = record.status.as_str(), "job finished");
                if let (Some(log), Some(finished_at)) = (&self.latency, record.finished_at) {
                    if let Err(e) = log.record(record.created_at, finished_at).await {
                        warn!(path = %log.path().display(), error = %e, "failed to persist latency");
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to store job outcome"),
        }

        outcome
    }

    async fn observe_and_collect(&self, cancel: &CancellationToken) -> JobOutcome {
        match self.observe(cancel).await {
            Observation::PollFailed(message) => JobOutcome::failed(message),
            Observation::Cancelled => JobOutcome::failed(MONITOR_CANCELLED),
            Observation::TimedOut(limit) => JobOutcome::failed(format!(
                "timed out after {}s waiting for {} to finish",
                limit.as_secs(),
                self.job_id
            )),
            Observation::Succeeded => match self.collect_output().await {
                Ok(results) => JobOutcome::succeeded(Some(results)),
                Err(message) => {
                    warn!(error = %message, "job succeeded but output could not be retrieved");
                    JobOutcome {
                        status: JobStatus::Succeeded,
                        results: None,
                        error: Some(message),
                    }
                }
            },
            Observation::ExecutionFailed => {
                // The execution failure is the earliest cause and wins over
                // any retrieval error.
                let results = match self.collect_output().await {
                    Ok(results) => Some(results),
                    Err(message) => {
                        debug!(error = %message, "discarding retrieval error for failed job");
                        None
                    }
                };
                JobOutcome {
                    status: JobStatus::Failed,
                    results,
                    error: Some(EXECUTION_FAILED.to_owned()),
                }
            }
        }
    }

    async fn observe(&self, cancel: &CancellationToken) -> Observation {
        let started = Instant::now();
        let mut interval = self.config.poll_interval;

        loop {
            let query = self.backend.unit_status(&self.names.unit);
            let polled = match self.config.max_duration {
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Observation::Cancelled,
                        polled = tokio::time::timeout(remaining, query) => match polled {
                            Ok(polled) => polled,
                            Err(_) => {
                                warn!(limit_secs = limit.as_secs(), "status query outlived maximum duration");
                                return Observation::TimedOut(limit);
                            }
                        },
                    }
                }
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Observation::Cancelled,
                    polled = query => polled,
                },
            };

            match polled {
                Err(e) => {
                    warn!(error = %e, "status query failed; failing job");
                    return Observation::PollFailed(format!(
                        "failed to get status of {}: {e}",
                        self.job_id
                    ));
                }
                Ok(UnitStatus::Succeeded) => return Observation::Succeeded,
                Ok(UnitStatus::Failed) => return Observation::ExecutionFailed,
                Ok(UnitStatus::Running) => {}
            }

            let mut delay = interval;
            if let Some(limit) = self.config.max_duration {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    warn!(limit_secs = limit.as_secs(), "job exceeded maximum duration");
                    return Observation::TimedOut(limit);
                }
                delay = delay.min(limit - elapsed);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Observation::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            interval = self.config.next_interval(interval);
        }
    }

    async fn collect_output(&self) -> Result<Bytes, String> {
        let source = self
            .backend
            .output_source(&self.names.unit)
            .await
            .map_err(|e| format!("failed to locate output of {}: {e}", self.job_id))?;

        self.backend
            .read_output(&source)
            .await
            .map_err(|e| {
                format!(
                    "failed to read output of {} from {}: {e}",
                    self.job_id, source.name
                )
            })
    }

    async fn cleanup(&self) {
        let unit = &self.names.unit;
        let artifact = &self.names.artifact;

        attempt_delete("execution unit", unit, self.backend.delete_execution_unit(unit)).await;
        attempt_delete("artifact", artifact, self.backend.delete_artifact(artifact)).await;
    }
}

/// Run one delete, logging any failure or panic instead of propagating it.
async fn attempt_delete<F>(kind: &str, name: &str, delete: F)
where
    F: Future<Output = Result<(), BackendError>>,
{
    debug!(kind, name, "deleting backend object");
    match AssertUnwindSafe(delete).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(kind, name, error = %e, "failed to delete backend object"),
        Err(_) => error!(kind, name, "panic while deleting backend object"),
    }
}

/// Handle to one spawned monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    job_id: JobId,
    cancel: CancellationToken,
    join: JoinHandle<JobOutcome>,
}

impl MonitorHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Ask the monitor to stop polling. Cleanup and the store update still run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the monitor to finish and return the outcome it stored.
    pub async fn join(self) -> Result<JobOutcome, tokio::task::JoinError> {
        self.join.await
    }
}

/// Tracks in-flight monitors so they can be cancelled individually or
/// drained together at shutdown.
#[derive(Debug)]
pub struct MonitorRegistry {
    root: CancellationToken,
    tracker: TaskTracker,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl Default for MonitorRegistry {
    fn default() -> Self {
        Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            tokens: Mutex::new(HashMap::new()),
        }
    }
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `monitor` as a detached task.
    ///
    /// The task outlives the request that created it; dropping the returned
    /// handle does not stop it.
    pub fn spawn(self: &Arc<Self>, monitor: Monitor) -> MonitorHandle {
        let job_id = monitor.job_id().clone();
        let cancel = self.root.child_token();

        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(job_id.clone(), cancel.clone());
        }

        let registry = Arc::clone(self);
        let task_id = job_id.clone();
        let task_cancel = cancel.clone();
        let span = info_span!("monitor", job_id = %job_id);

        let join = self.tracker.spawn(
            async move {
                let outcome = monitor.run(task_cancel).await;
                registry.forget(&task_id);
                outcome
            }
            .instrument(span),
        );

        MonitorHandle {
            job_id,
            cancel,
            join,
        }
    }

    /// Cancel one monitor. Returns `true` if it was still running.
    pub fn cancel(&self, id: &JobId) -> bool {
        let token = self.tokens.lock().ok().and_then(|mut t| t.remove(id));
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running monitor.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Number of monitors that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for all monitors to finish, up to `grace`.
    ///
    /// Returns `true` if every monitor finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        drained
    }

    fn forget(&self, id: &JobId) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(id);
        }
    }
}
