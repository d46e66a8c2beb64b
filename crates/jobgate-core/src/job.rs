use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::JobId;

/// Lifecycle state of a submitted job.
///
/// `Pending` is the only non-terminal state; a job moves out of it exactly
/// once and never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// The stored state of one job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    /// Raw output of the execution unit. Only set once terminal.
    pub results: Option<Bytes>,
    /// Failure cause. Only set once terminal.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A freshly registered record.
    pub fn pending(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            results: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Read-only projection handed to status queries.
    ///
    /// `results` and `error` are withheld until the job is terminal.
    pub fn view(&self) -> JobView {
        if !self.status.is_terminal() {
            return JobView {
                id: self.id.clone(),
                status: self.status,
                results: None,
                error: None,
            };
        }
        JobView {
            id: self.id.clone(),
            status: self.status,
            results: Some(self.results.clone().unwrap_or_default()),
            error: self.error.clone(),
        }
    }
}

/// Terminal result produced by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub results: Option<Bytes>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(results: Option<Bytes>) -> Self {
        Self {
            status: JobStatus::Succeeded,
            results,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            results: None,
            error: Some(error.into()),
        }
    }
}

/// Snapshot returned by the status query API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub results: Option<Bytes>,
    pub error: Option<String>,
}
