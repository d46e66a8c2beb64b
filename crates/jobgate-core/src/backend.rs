//! Boundary to the execution backend.
//!
//! The core only consumes this trait; the Kubernetes implementation lives in
//! `jobgate-kube`, and [`crate::testing::ScriptedBackend`] drives the tests.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors reported by an [`ExecutionBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The named object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The backend answered but refused the request.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The execution unit has no output to read yet.
    #[error("no output available for {unit}")]
    NoOutput { unit: String },

    /// The backend answered with something we could not interpret.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Reference to a staged input artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub name: String,
}

/// Reference to a scheduled execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub name: String,
}

/// Where the output of a finished execution unit can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSource {
    /// Backend-specific locator, e.g. a pod name.
    pub name: String,
}

/// Observed state of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Running,
    Succeeded,
    Failed,
}

/// Operations the core needs from the orchestration backend.
///
/// Deletes must be idempotent: deleting an object that is already gone is
/// `Ok(())`.
#[async_trait]
pub trait ExecutionBackend: Send + Sync + 'static {
    async fn create_artifact(&self, name: &str, data: Bytes) -> Result<ArtifactHandle, BackendError>;

    async fn create_execution_unit(
        &self,
        name: &str,
        artifact: &ArtifactHandle,
    ) -> Result<ExecutionUnit, BackendError>;

    async fn unit_status(&self, name: &str) -> Result<UnitStatus, BackendError>;

    async fn output_source(&self, name: &str) -> Result<OutputSource, BackendError>;

    async fn read_output(&self, source: &OutputSource) -> Result<Bytes, BackendError>;

    async fn delete_artifact(&self, name: &str) -> Result<(), BackendError>;

    async fn delete_execution_unit(&self, name: &str) -> Result<(), BackendError>;
}
