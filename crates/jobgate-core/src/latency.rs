//! Side-channel latency aggregate.
//!
//! Tracks the makespan of all completed jobs (`max_end - min_start`) and the
//! number of jobs, persisted as JSON. The file is replaced atomically on
//! every update so readers never observe a partial write.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyState {
    #[serde(default)]
    pub min_start: DateTime<Utc>,
    #[serde(default)]
    pub max_end: DateTime<Utc>,
    #[serde(default)]
    pub total_seconds: f64,
    #[serde(default)]
    pub jobs: u64,
}

impl LatencyState {
    /// Fold one job's `[start, end]` interval into the aggregate.
    pub fn record(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        if self.jobs == 0 || start < self.min_start {
            self.min_start = start;
        }
        if self.jobs == 0 || end > self.max_end {
            self.max_end = end;
        }
        self.total_seconds = (self.max_end - self.min_start).num_milliseconds() as f64 / 1000.0;
        self.jobs += 1;
    }
}

/// File-backed [`LatencyState`] shared by all monitors.
#[derive(Debug)]
pub struct LatencyLog {
    path: PathBuf,
    state: Mutex<LatencyState>,
}

impl LatencyLog {
    /// Open the aggregate at `path`, resuming from its contents when the file
    /// exists and parses.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring unreadable latency state");
                LatencyState::default()
            }),
            Err(_) => LatencyState::default(),
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> LatencyState {
        self.state.lock().await.clone()
    }

    /// Record one completed job and persist the new aggregate.
    pub async fn record(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> io::Result<()> {
        let mut state = self.state.lock().await;
        state.record(start, end);
        // Written under the lock so files land in update order.
        write_atomic(&self.path, &state).await?;
        debug!(jobs = state.jobs, total_seconds = state.total_seconds, "latency updated");
        Ok(())
    }
}

async fn write_atomic(path: &Path, state: &LatencyState) -> io::Result<()> {
    let data = serde_json::to_vec(state).map_err(io::Error::other)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = dir.join(format!(".lat_tmp_{}", Uuid::new_v4().simple()));

    if let Err(e) = tokio::fs::write(&tmp, &data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn scratch_file() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("jobgate-latency-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("latency_state.json")
    }

    #[test]
    fn first_job_sets_both_bounds() {
        let mut state = LatencyState::default();
        state.record(at(100), at(130));
        assert_eq!(state.min_start, at(100));
        assert_eq!(state.max_end, at(130));
        assert_eq!(state.total_seconds, 30.0);
        assert_eq!(state.jobs, 1);
    }

    #[test]
    fn makespan_spans_overlapping_jobs() {
        let mut state = LatencyState::default();
        state.record(at(100), at(130));
        state.record(at(90), at(120));
        state.record(at(110), at(200));
        assert_eq!(state.min_start, at(90));
        assert_eq!(state.max_end, at(200));
        assert_eq!(state.total_seconds, 110.0);
        assert_eq!(state.jobs, 3);
    }

    #[tokio::test]
    async fn record_persists_and_reopens() {
        let path = scratch_file();
        let log = LatencyLog::open(&path);
        log.record(at(10), at(15)).await.unwrap();
        log.record(at(12), at(20)).await.unwrap();

        let on_disk: LatencyState =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.jobs, 2);
        assert_eq!(on_disk.total_seconds, 10.0);

        let reopened = LatencyLog::open(&path);
        assert_eq!(reopened.snapshot().await, on_disk);

        // No temp files are left behind.
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".lat_tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_state_file_starts_fresh() {
        let path = scratch_file();
        std::fs::write(&path, b"{not json").unwrap();
        let log = LatencyLog::open(&path);
        assert_eq!(log.snapshot().await, LatencyState::default());
    }
}
