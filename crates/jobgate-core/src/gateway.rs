//! Submission gateway and status query API.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::backend::{BackendError, ExecutionBackend};
use crate::identity::{normalize, IdAllocator, JobId, ResourceNames};
use crate::job::{JobRecord, JobView};
use crate::latency::LatencyLog;
use crate::monitor::{Monitor, MonitorConfig, MonitorHandle, MonitorRegistry};
use crate::store::{JobStore, StoreError};

/// One unit of work handed in by a client.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Who submits, e.g. a student name.
    pub requester: String,
    /// What is being run, e.g. an assignment name.
    pub workload: String,
    /// Input archive staged for the execution unit.
    pub artifact: Bytes,
}

/// Which creation step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    StageArtifact,
    CreateUnit,
}

impl fmt::Display for CreationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationStage::StageArtifact => f.write_str("stage artifact"),
            CreationStage::CreateUnit => f.write_str("create execution unit"),
        }
    }
}

/// Errors returned by [`Gateway::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The submission is incomplete or unusable. Nothing was created.
    #[error("invalid submission: {0}")]
    Validation(String),

    /// The backend refused to create one of the job's objects. Anything
    /// already staged has been removed again.
    #[error("failed to {stage}: {source}")]
    Creation {
        stage: CreationStage,
        source: BackendError,
    },

    /// The generated id is already taken. Backend objects were rolled back.
    #[error("job {0} is already registered")]
    Conflict(JobId),

    /// The store refused the pending record for another reason. Backend
    /// objects were rolled back.
    #[error("failed to register job {id}: {source}")]
    Registration { id: JobId, source: StoreError },
}

/// A job that was accepted and is now being monitored.
#[derive(Debug)]
pub struct Accepted {
    pub job_id: JobId,
    pub monitor: MonitorHandle,
}

/// Accepts submissions, starts their monitors and answers status queries.
pub struct Gateway {
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn JobStore>,
    ids: IdAllocator,
    monitors: Arc<MonitorRegistry>,
    monitor_config: MonitorConfig,
    latency: Option<Arc<LatencyLog>>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("monitor_config", &self.monitor_config)
            .field("in_flight", &self.monitors.in_flight())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        store: Arc<dyn JobStore>,
        monitor_config: MonitorConfig,
    ) -> Self {
        Self {
            backend,
            store,
            ids: IdAllocator::new(),
            monitors: Arc::new(MonitorRegistry::new()),
            monitor_config,
            latency: None,
        }
    }

    /// Record per-job latency into `log` as monitors finish.
    pub fn with_latency_log(mut self, log: Arc<LatencyLog>) -> Self {
        self.latency = Some(log);
        self
    }

    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    /// Validate, stage and schedule a submission.
    ///
    /// Returns as soon as the monitor is spawned; it never waits for the job
    /// to finish.
    pub async fn submit(&self, submission: Submission) -> Result<Accepted, SubmitError> {
        validate(&submission)?;

        let job_id = self.ids.allocate(&submission.requester, &submission.workload);
        let names = job_id.resource_names();
        info!(job_id = %job_id, bytes = submission.artifact.len(), "accepted submission");

        let artifact = self
            .backend
            .create_artifact(&names.artifact, submission.artifact)
            .await
            .map_err(|source| {
                error!(job_id = %job_id, error = %source, "failed to stage artifact");
                SubmitError::Creation {
                    stage: CreationStage::StageArtifact,
                    source,
                }
            })?;

        if let Err(source) = self
            .backend
            .create_execution_unit(&names.unit, &artifact)
            .await
        {
            error!(job_id = %job_id, error = %source, "failed to create execution unit");
            if let Err(e) = self.backend.delete_artifact(&names.artifact).await {
                warn!(job_id = %job_id, artifact = %names.artifact, error = %e,
                    "failed to roll back artifact after creation failure");
            }
            return Err(SubmitError::Creation {
                stage: CreationStage::CreateUnit,
                source,
            });
        }

        if let Err(e) = self.store.put(JobRecord::pending(job_id.clone())).await {
            error!(job_id = %job_id, error = %e, "failed to register job");
            self.roll_back(&job_id, &names).await;
            return Err(match e {
                StoreError::Duplicate(id) => SubmitError::Conflict(id),
                source => SubmitError::Registration { id: job_id, source },
            });
        }

        let monitor = Monitor::new(
            job_id.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            self.monitor_config.clone(),
        )
        .with_latency_log(self.latency.clone());
        let monitor = self.monitors.spawn(monitor);

        Ok(Accepted { job_id, monitor })
    }

    /// Current state of a job. Never waits on its monitor.
    pub async fn status(&self, id: &JobId) -> Result<JobView, StoreError> {
        self.store
            .get(id)
            .await
            .map(|record| record.view())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn roll_back(&self, job_id: &JobId, names: &ResourceNames) {
        if let Err(e) = self.backend.delete_execution_unit(&names.unit).await {
            warn!(job_id = %job_id, error = %e, "failed to roll back execution unit");
        }
        if let Err(e) = self.backend.delete_artifact(&names.artifact).await {
            warn!(job_id = %job_id, error = %e, "failed to roll back artifact");
        }
    }
}

fn validate(submission: &Submission) -> Result<(), SubmitError> {
    check_label("requester", &submission.requester)?;
    check_label("workload", &submission.workload)?;
    if submission.artifact.is_empty() {
        return Err(SubmitError::Validation("artifact is missing or empty".into()));
    }
    Ok(())
}

fn check_label(what: &str, value: &str) -> Result<(), SubmitError> {
    if value.trim().is_empty() {
        return Err(SubmitError::Validation(format!("{what} label is missing")));
    }
    if normalize(value).is_empty() {
        return Err(SubmitError::Validation(format!(
            "{what} label {value:?} has no usable characters"
        )));
    }
    Ok(())
}
