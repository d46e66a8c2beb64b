use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::identity::JobId;
use crate::job::{JobOutcome, JobRecord};

/// Errors returned by a [`JobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record with this id is already registered.
    #[error("job {0} already registered")]
    Duplicate(JobId),

    /// No record with this id exists.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The record already reached a terminal state.
    #[error("job {0} already finished")]
    AlreadyTerminal(JobId),
}

/// Concurrency-safe mapping from job id to job record.
///
/// Implementations must serialize all operations against each other and must
/// never hold their lock across backend I/O.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Register a new pending record.
    async fn put(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Apply a terminal outcome. Returns the updated record.
    async fn update(&self, id: &JobId, outcome: JobOutcome) -> Result<JobRecord, StoreError>;

    /// Snapshot of the current record.
    async fn get(&self, id: &JobId) -> Option<JobRecord>;

    /// Number of registered records.
    async fn len(&self) -> usize;
}

/// In-process [`JobStore`] backed by a single `RwLock<HashMap>`.
///
/// Many status readers can proceed concurrently; the gateway and monitors
/// take the write lock only for the insert or terminal swap.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&record.id) {
            warn!(job_id = %record.id, "refusing to overwrite existing job record");
            return Err(StoreError::Duplicate(record.id));
        }
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, id: &JobId, outcome: JobOutcome) -> Result<JobRecord, StoreError> {
        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if record.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.clone()));
        }

        record.status = outcome.status;
        record.results = outcome.results;
        record.error = outcome.error;
        record.finished_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.inner.read().await.get(id).cloned()
    }

    async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
