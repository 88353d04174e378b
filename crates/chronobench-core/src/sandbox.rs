use crate::model::{Benchmark, RevisionInfo};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version of the serialization contract spoken across the sandbox
/// subprocess boundary. Bumped on any incompatible payload change.
pub const WIRE_VERSION: u32 = 1;

/// Benchmark-definition payload sent to the sandbox subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchRequest {
    pub version: u32,
    pub benchmarks: Vec<BenchDef>,
}

impl BenchRequest {
    pub fn new(benchmarks: &[Benchmark]) -> Self {
        Self {
            version: WIRE_VERSION,
            benchmarks: benchmarks.iter().map(BenchDef::from).collect(),
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("encoding benchmark request")
    }
}

/// The slice of a `Benchmark` the sandbox needs to execute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchDef {
    pub checksum: String,
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
}

impl From<&Benchmark> for BenchDef {
    fn from(b: &Benchmark) -> Self {
        Self {
            checksum: b.checksum.clone(),
            name: b.name.clone(),
            code: b.code.clone(),
            setup: b.setup.clone(),
        }
    }
}

/// Outcome payload received back, keyed by benchmark checksum. An empty
/// outcome map is a total execution failure for the revision, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchResponse {
    pub version: u32,
    pub outcomes: HashMap<String, OutcomeRecord>,
}

impl BenchResponse {
    pub fn decode(s: &str) -> anyhow::Result<Self> {
        let resp: Self = serde_json::from_str(s).context("decoding benchmark response")?;
        if resp.version != WIRE_VERSION {
            anyhow::bail!(
                "sandbox wire version mismatch: got {}, expected {}",
                resp.version,
                WIRE_VERSION
            );
        }
        Ok(resp)
    }
}

/// Raw outcome for one benchmark run. `timing` is absent on failure, in
/// which case `traceback` carries the failure text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loops: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Enumerates revisions and branch membership for the tracked project.
pub trait VcsAdapter {
    /// Full history, chronological order.
    fn revisions(&self) -> &[RevisionInfo];

    /// Branches currently containing the revision.
    fn branches_containing(&self, rev: &str) -> Vec<String>;
}

/// Builds the code at a revision and runs benchmark suites against it in a
/// subprocess. The checkout is a shared mutable working directory; callers
/// must serialize access to it.
pub trait Sandbox {
    /// Check out and build the revision. Build problems surface as
    /// [`crate::errors::FailedToBuildError`].
    fn switch_to_revision(&mut self, rev: &str) -> anyhow::Result<()>;

    /// Force a from-scratch rebuild on the next switch.
    fn hard_clean(&mut self) -> anyhow::Result<()>;

    /// Run the requested benchmarks against the checked-out revision.
    fn run_benchmarks(&mut self, request: &BenchRequest) -> anyhow::Result<BenchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_decode_checks_wire_version() {
        let ok = r#"{"version":1,"outcomes":{}}"#;
        assert!(BenchResponse::decode(ok).unwrap().outcomes.is_empty());

        let bad = r#"{"version":2,"outcomes":{}}"#;
        let err = BenchResponse::decode(bad).unwrap_err();
        assert!(err.to_string().contains("wire version mismatch"));
    }

    #[test]
    fn request_round_trips_through_json() {
        let b = Benchmark::new("sort", "x = sorted(data)", Some("data = range(10)".into()));
        let encoded = BenchRequest::new(std::slice::from_ref(&b)).encode().unwrap();
        let back: BenchRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back.version, WIRE_VERSION);
        assert_eq!(back.benchmarks[0].checksum, b.checksum);
    }
}
