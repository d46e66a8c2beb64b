//! Asynchronous job lifecycle for jobgate.
//!
//! A [`Gateway`] stages each submission on an [`ExecutionBackend`], records a
//! pending [`JobRecord`] in a [`JobStore`] and spawns one [`Monitor`] that
//! carries the job to a terminal state and removes its backend objects.

pub mod backend;
pub mod gateway;
pub mod identity;
pub mod job;
pub mod latency;
pub mod monitor;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{ArtifactHandle, BackendError, ExecutionBackend, ExecutionUnit, OutputSource, UnitStatus};
pub use gateway::{Accepted, CreationStage, Gateway, Submission, SubmitError};
pub use identity::{normalize, JobId, ResourceNames};
pub use job::{JobOutcome, JobRecord, JobStatus, JobView};
pub use latency::{LatencyLog, LatencyState};
pub use monitor::{Monitor, MonitorConfig, MonitorHandle, MonitorRegistry};
pub use store::{JobStore, MemoryJobStore, StoreError};
