//! Scripted in-process [`ExecutionBackend`] for tests.
//!
//! Every call is recorded so tests can assert on exactly what the gateway
//! and monitors asked the backend to do.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::{
    ArtifactHandle, BackendError, ExecutionBackend, ExecutionUnit, OutputSource, UnitStatus,
};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    CreateArtifact(String),
    CreateUnit(String),
    UnitStatus(String),
    OutputSource(String),
    ReadOutput(String),
    DeleteArtifact(String),
    DeleteUnit(String),
}

/// What the backend returns when asked for a unit's output.
#[derive(Debug, Clone)]
pub enum OutputScript {
    Bytes(Bytes),
    LocateError(BackendError),
    ReadError(BackendError),
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    statuses: HashMap<String, VecDeque<Result<UnitStatus, BackendError>>>,
    outputs: HashMap<String, OutputScript>,
    panics: HashSet<String>,
    hangs: HashSet<String>,
    default_status: Option<Result<UnitStatus, BackendError>>,
    artifacts: HashSet<String>,
    units: HashSet<String>,
    fail_create_artifact: Option<BackendError>,
    fail_create_unit: Option<BackendError>,
    fail_delete_artifact: Option<BackendError>,
    fail_delete_unit: Option<BackendError>,
}

/// Backend whose answers are scripted per execution unit.
///
/// Units without a status script report the default status (`Running`
/// unless changed) forever. The last scripted
/// status of a unit is sticky once its queue runs dry.
#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<Inner>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue status answers for `unit`.
    pub fn push_statuses<I>(&self, unit: &str, statuses: I)
    where
        I: IntoIterator<Item = Result<UnitStatus, BackendError>>,
    {
        self.lock()
            .statuses
            .entry(unit.to_owned())
            .or_default()
            .extend(statuses);
    }

    /// Answer for units that have no scripted statuses.
    pub fn set_default_status(&self, status: Result<UnitStatus, BackendError>) {
        self.lock().default_status = Some(status);
    }

    pub fn set_output(&self, unit: &str, output: OutputScript) {
        self.lock().outputs.insert(unit.to_owned(), output);
    }

    /// Make the next status query for `unit` panic.
    pub fn panic_on_status(&self, unit: &str) {
        self.lock().panics.insert(unit.to_owned());
    }

    /// Make every status query for `unit` wait forever.
    pub fn hang_on_status(&self, unit: &str) {
        self.lock().hangs.insert(unit.to_owned());
    }

    pub fn fail_create_artifact(&self, err: BackendError) {
        self.lock().fail_create_artifact = Some(err);
    }

    pub fn fail_create_unit(&self, err: BackendError) {
        self.lock().fail_create_unit = Some(err);
    }

    pub fn fail_delete_artifact(&self, err: BackendError) {
        self.lock().fail_delete_artifact = Some(err);
    }

    pub fn fail_delete_unit(&self, err: BackendError) {
        self.lock().fail_delete_unit = Some(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Artifacts created and not yet deleted.
    pub fn live_artifacts(&self) -> HashSet<String> {
        self.lock().artifacts.clone()
    }

    /// Execution units created and not yet deleted.
    pub fn live_units(&self) -> HashSet<String> {
        self.lock().units.clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn create_artifact(&self, name: &str, _data: Bytes) -> Result<ArtifactHandle, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::CreateArtifact(name.to_owned()));
        if let Some(err) = inner.fail_create_artifact.clone() {
            return Err(err);
        }
        inner.artifacts.insert(name.to_owned());
        Ok(ArtifactHandle { name: name.to_owned() })
    }

    async fn create_execution_unit(
        &self,
        name: &str,
        _artifact: &ArtifactHandle,
    ) -> Result<ExecutionUnit, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::CreateUnit(name.to_owned()));
        if let Some(err) = inner.fail_create_unit.clone() {
            return Err(err);
        }
        inner.units.insert(name.to_owned());
        Ok(ExecutionUnit { name: name.to_owned() })
    }

    async fn unit_status(&self, name: &str) -> Result<UnitStatus, BackendError> {
        let (should_panic, should_hang) = {
            let mut inner = self.lock();
            inner.calls.push(Call::UnitStatus(name.to_owned()));
            (inner.panics.remove(name), inner.hangs.contains(name))
        };
        if should_panic {
            panic!("scripted panic while querying {name}");
        }
        if should_hang {
            std::future::pending::<()>().await;
        }

        let mut inner = self.lock();
        let fallback = inner.default_status.clone().unwrap_or(Ok(UnitStatus::Running));
        match inner.statuses.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(fallback),
            Some(queue) => queue.front().cloned().unwrap_or(fallback),
            None => fallback,
        }
    }

    async fn output_source(&self, name: &str) -> Result<OutputSource, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::OutputSource(name.to_owned()));
        match inner.outputs.get(name) {
            Some(OutputScript::LocateError(err)) => Err(err.clone()),
            Some(_) => Ok(OutputSource { name: format!("{name}-pod") }),
            None => Err(BackendError::NoOutput { unit: name.to_owned() }),
        }
    }

    async fn read_output(&self, source: &OutputSource) -> Result<Bytes, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::ReadOutput(source.name.clone()));
        let unit = source.name.trim_end_matches("-pod");
        match inner.outputs.get(unit) {
            Some(OutputScript::Bytes(b)) => Ok(b.clone()),
            Some(OutputScript::ReadError(err)) | Some(OutputScript::LocateError(err)) => Err(err.clone()),
            None => Err(BackendError::NoOutput { unit: unit.to_owned() }),
        }
    }

    async fn delete_artifact(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteArtifact(name.to_owned()));
        if let Some(err) = inner.fail_delete_artifact.clone() {
            return Err(err);
        }
        inner.artifacts.remove(name);
        Ok(())
    }

    async fn delete_execution_unit(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteUnit(name.to_owned()));
        if let Some(err) = inner.fail_delete_unit.clone() {
            return Err(err);
        }
        inner.units.remove(name);
        Ok(())
    }
}
