//! Job identity and backend resource naming.
//!
//! Every backend object belonging to a job is named from the job id alone, so
//! a monitor can always reconstruct what it has to clean up.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Longest id the backend accepts. The id is also used as a label value,
/// which caps it at 63 characters.
pub const MAX_ID_LEN: usize = 63;

/// Prefix of the artifact (staged input) name.
pub const ARTIFACT_PREFIX: &str = "script-cm-";

/// A backend-safe, process-unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backend resource names owned by this job.
    pub fn resource_names(&self) -> ResourceNames {
        ResourceNames {
            artifact: format!("{ARTIFACT_PREFIX}{}", self.0),
            unit: self.0.clone(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_owned())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Names of the backend objects created for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// Staged input artifact.
    pub artifact: String,
    /// Execution unit running the work.
    pub unit: String,
}

fn is_separator(c: char) -> bool {
    c == '-' || c == '.'
}

/// Normalize `s` into a backend-compliant name fragment.
///
/// Lowercases, replaces every run of characters outside `[a-z0-9.-]` with a
/// single `-`, keeps only the first separator of any run of separators, and
/// trims separators from both ends. The result is a fixed point:
/// `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_sep = false;

    for c in s.chars().flat_map(char::to_lowercase) {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() || is_separator(c) {
            c
        } else {
            '-'
        };

        if is_separator(mapped) {
            if last_was_sep || out.is_empty() {
                // Leading separators are dropped, repeated ones collapse.
                last_was_sep = true;
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }
        out.push(mapped);
    }

    while out.ends_with(is_separator) {
        out.pop();
    }
    out
}

/// Build a job id from two caller labels and a disambiguator.
///
/// The label prefix is truncated so the whole id fits [`MAX_ID_LEN`]; the
/// disambiguator is never truncated.
pub fn job_id(requester: &str, workload: &str, disambiguator: u64) -> JobId {
    let suffix = disambiguator.to_string();
    let mut prefix = normalize(&format!("{}-{}", normalize(requester), normalize(workload)));

    let budget = MAX_ID_LEN.saturating_sub(suffix.len() + 1);
    if prefix.len() > budget {
        // normalize() output is ASCII, so byte truncation is char-safe.
        prefix.truncate(budget);
        prefix = normalize(&prefix);
    }

    if prefix.is_empty() {
        JobId(suffix)
    } else {
        JobId(normalize(&format!("{prefix}-{suffix}")))
    }
}

/// Hands out strictly increasing disambiguators based on wall-clock seconds.
///
/// Two submissions inside the same second get consecutive values, so ids stay
/// unique even when labels are identical.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next disambiguator given the current time in seconds.
    pub fn next_at(&self, now_secs: u64) -> u64 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_secs.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }

    /// Next disambiguator using the system clock.
    pub fn next(&self) -> u64 {
        let now = Utc::now().timestamp().max(0) as u64;
        self.next_at(now)
    }

    /// Allocate a fresh job id for the given labels.
    pub fn allocate(&self, requester: &str, workload: &str) -> JobId {
        job_id(requester, workload, self.next())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn normalize_lowercases_and_replaces_disallowed_runs() {
        assert_eq!(normalize("Alice"), "alice");
        assert_eq!(normalize("John  Smith!!"), "john-smith");
        assert_eq!(normalize("CSE_160/PA2"), "cse-160-pa2");
    }

    #[test]
    fn normalize_trims_and_collapses_separators() {
        assert_eq!(normalize("--a--b--"), "a-b");
        assert_eq!(normalize(".hidden."), "hidden");
        assert_eq!(normalize("a.-.b"), "a.b");
        assert_eq!(normalize("a - b"), "a-b");
        assert_eq!(normalize("!!!"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_handles_non_ascii() {
        assert_eq!(normalize("Zoë Ünal"), "zo-nal");
        assert_eq!(normalize("日本"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "Alice",
            "  weird__Name..with--stuff  ",
            "-.-.-",
            "a.-b",
            "ÄÖÜ-ß",
            "x--.--y",
            "1.2.3",
            "trailing.",
            "MiXeD CaSe 42",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn job_id_matches_expected_shape() {
        let id = job_id("Alice", "HW1", 1_700_000_000);
        assert_eq!(id.as_str(), "alice-hw1-1700000000");
    }

    #[test]
    fn job_id_survives_labels_that_normalize_to_nothing() {
        assert_eq!(job_id("!!!", "HW1", 7).as_str(), "hw1-7");
        assert_eq!(job_id("", "", 7).as_str(), "7");
    }

    #[test]
    fn job_id_is_truncated_to_backend_limit() {
        let long = "a".repeat(200);
        let id = job_id(&long, &long, 1_700_000_000);
        assert!(id.as_str().len() <= MAX_ID_LEN);
        assert!(id.as_str().ends_with("-1700000000"));
        assert_eq!(normalize(id.as_str()), id.as_str());
    }

    #[test]
    fn truncation_never_leaves_dangling_separator() {
        // Truncation lands right after a separator in the prefix.
        let requester = format!("{}-b", "a".repeat(51));
        let id = job_id(&requester, "c", 1_700_000_000);
        assert!(!id.as_str().contains("--"));
        assert!(id.as_str().len() <= MAX_ID_LEN);
    }

    #[test]
    fn resource_names_derive_from_id() {
        let names = JobId::from("alice-hw1-1").resource_names();
        assert_eq!(names.artifact, "script-cm-alice-hw1-1");
        assert_eq!(names.unit, "alice-hw1-1");
    }

    #[test]
    fn allocator_is_strictly_increasing_within_a_second() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_at(100), 100);
        assert_eq!(ids.next_at(100), 101);
        assert_eq!(ids.next_at(100), 102);
        assert_eq!(ids.next_at(500), 500);
        // A clock going backwards never yields a reused value.
        assert_eq!(ids.next_at(10), 501);
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| ids.allocate("Alice", "HW1"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().expect("allocator thread panicked") {
                assert!(seen.insert(id.clone()), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
