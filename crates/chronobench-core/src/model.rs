use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A benchmark definition, identified by a content checksum over its
/// defining code. The checksum is the identity contract across revisions:
/// re-registering the same checksum only updates name/description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Benchmark {
    pub checksum: String,
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Revisions timestamped before this date are never asked to run the
    /// benchmark (the code under test did not exist yet).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
}

impl Benchmark {
    pub fn new(name: impl Into<String>, code: impl Into<String>, setup: Option<String>) -> Self {
        let code = code.into();
        let checksum = crate::checksum::benchmark_checksum(&code, setup.as_deref());
        Self {
            checksum,
            name: name.into(),
            code,
            setup,
            description: None,
            start_date: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }
}

/// One stored timing result: at most one row per (checksum, revision).
///
/// `timing` is absent iff the run failed or the benchmark did not execute.
/// `nnochange` counts consecutive re-runs that failed to improve the stored
/// best timing; it only ever increments, and only under the `min` policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub checksum: String,
    pub revision: String,
    pub timestamp: DateTime<Utc>,
    pub ncalls: Option<i64>,
    pub timing: Option<f64>,
    pub traceback: Option<String>,
    pub nnochange: i64,
}

/// A point in the tracked project's history, as reported by the VCS adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// What happened for one revision: whether any active benchmark produced a
/// timing, and how many were active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub any_succeeded: bool,
    pub n_active: usize,
}

/// Policy for benchmarks that already have a stored result at a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingPolicy {
    /// Do not re-run benchmarks that were already estimated.
    #[default]
    Skip,
    /// Re-run and keep the best (minimum) estimate, until the best timing
    /// has been stable for `nochange_rerun_limit` consecutive attempts.
    Min,
}
