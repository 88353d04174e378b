use crate::config::RunConfig;
use crate::errors::FailedToBuildError;
use crate::model::{Benchmark, ExistingPolicy, ResultRow, RevisionInfo, RunOutcome};
use crate::sandbox::{BenchRequest, OutcomeRecord, Sandbox, VcsAdapter, WIRE_VERSION};
use crate::select::select_revisions;
use crate::storage::store::{ResultOp, Store};
use std::collections::HashMap;

/// Relative margin below which a fresh timing is judged no better than the
/// stored one. Within the margin the stored best is kept and the no-change
/// counter incremented instead.
const MIN_IMPROVEMENT: f64 = 0.005;

/// When a clean rebuild still yields zero successes, only blacklist if more
/// than this many benchmarks were active; a couple of flaky benchmarks must
/// not quarantine a whole revision.
const BLACKLIST_ACTIVE_THRESHOLD: usize = 5;

/// Sequences benchmark runs across the revision history: selects revisions,
/// decides per revision which benchmarks still need execution, delegates
/// execution to the sandbox, applies the keep-best and retry policies, and
/// commits outcomes to the store.
///
/// The runner holds no durable state of its own; resumption after a crash is
/// derived entirely by re-querying the store.
pub struct Runner {
    store: Store,
    repo: Box<dyn VcsAdapter>,
    sandbox: Box<dyn Sandbox>,
    benchmarks: Vec<Benchmark>,
    config: RunConfig,
}

impl Runner {
    pub fn new(
        store: Store,
        repo: Box<dyn VcsAdapter>,
        sandbox: Box<dyn Sandbox>,
        benchmarks: Vec<Benchmark>,
        config: RunConfig,
    ) -> anyhow::Result<Self> {
        tracing::info!(n = benchmarks.len(), "initializing benchmark runner");
        store.register_benchmarks(&benchmarks)?;
        Ok(Self {
            store,
            repo,
            sandbox,
            benchmarks,
            config,
        })
    }

    /// Read access to the underlying store, for blacklist and branch
    /// membership queries by reporting code.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Deletes stored benchmarks (and their results) that are no longer in
    /// the registered suite.
    pub fn reconcile_benchmarks(&self) -> anyhow::Result<usize> {
        let current = self.benchmarks.iter().map(|b| b.checksum.clone()).collect();
        self.store.reconcile_benchmarks(&current)
    }

    /// One pass over the selected revisions. Never halts on a single
    /// revision's failure; only configuration and store errors abort the run.
    pub fn run(&mut self) -> anyhow::Result<Vec<(String, RunOutcome)>> {
        tracing::info!("collecting revisions to run");
        let revisions = self.revisions_to_run();
        tracing::info!(n = revisions.len(), "running benchmarks");

        // Snapshot once per pass: a revision blacklisted mid-pass is skipped
        // on the next call, not retroactively within this one.
        let blacklist = self.store.blacklist()?;
        let mut ran = Vec::new();

        for rev in revisions {
            if self.config.use_blacklist && blacklist.contains(&rev.id) {
                tracing::warn!(rev = %rev.id, "skipping blacklisted revision");
                continue;
            }

            let outcome = match self.run_and_write_results(&rev) {
                Ok(o) => o,
                Err(e) => {
                    if let Some(build) = e.downcast_ref::<FailedToBuildError>() {
                        self.blacklist_rev(&rev.id, &build.0)?;
                        continue;
                    }
                    return Err(e);
                }
            };
            ran.push((rev.id.clone(), outcome));

            if outcome.n_active > 0 && !outcome.any_succeeded {
                tracing::debug!(rev = %rev.id, n_active = outcome.n_active,
                    "none of the active benchmarks succeeded");
                // Second chance after a from-scratch rebuild.
                self.sandbox.hard_clean()?;
                match self.run_and_write_results(&rev) {
                    Ok(second) => {
                        // The active set cannot have grown, so judge against
                        // the first attempt's count; this revision is
                        // probably broken and not worth more time.
                        if !second.any_succeeded && outcome.n_active > BLACKLIST_ACTIVE_THRESHOLD {
                            self.blacklist_rev(
                                &rev.id,
                                &format!(
                                    "none of {} active benchmarks succeeded",
                                    outcome.n_active
                                ),
                            )?;
                        }
                    }
                    Err(e) => {
                        if crate::errors::is_build_failure(&e) {
                            tracing::warn!(rev = %rev.id, error = %e,
                                "failed to build on 2nd attempt, verify build infrastructure; skipping for now");
                            continue;
                        }
                        return Err(e);
                    }
                }
            }
        }
        Ok(ran)
    }

    fn revisions_to_run(&self) -> Vec<RevisionInfo> {
        select_revisions(
            self.repo.revisions(),
            self.config.start_date,
            self.config.run_option,
            self.config.run_order,
        )
    }

    fn blacklist_rev(&self, rev: &str, msg: &str) -> anyhow::Result<()> {
        if self.config.use_blacklist {
            tracing::warn!(rev, msg, "blacklisting revision");
            self.store.blacklist_add(rev)?;
        }
        Ok(())
    }

    /// One revision end to end: refresh branch membership, compute the
    /// active set, execute it, commit outcomes in a single transaction.
    /// Build failures propagate unhandled; the driver loop owns that policy.
    pub fn run_and_write_results(&mut self, rev: &RevisionInfo) -> anyhow::Result<RunOutcome> {
        for branch in self.repo.branches_containing(&rev.id) {
            self.store.branch_add(&branch, &rev.id)?;
        }

        let active = self.active_benchmarks(rev)?;
        if active.is_empty() {
            tracing::info!(rev = %rev.id, "no benchmarks need running");
            return Ok(RunOutcome {
                any_succeeded: false,
                n_active: 0,
            });
        }

        let outcomes = self.run_revision(rev, &active)?;

        let prior = self.store.results_for_revision(&rev.id)?;
        let mut any_succeeded = false;
        let mut ops = Vec::with_capacity(outcomes.len());
        for (checksum, outcome) in &outcomes {
            any_succeeded = any_succeeded || outcome.timing.is_some();
            let row = ResultRow {
                checksum: checksum.clone(),
                revision: rev.id.clone(),
                timestamp: rev.timestamp,
                ncalls: outcome.loops,
                timing: outcome.timing,
                traceback: outcome.traceback.clone(),
                nnochange: 0,
            };
            if self.config.existing == ExistingPolicy::Min {
                if let Some(old) = prior.get(checksum) {
                    if keeps_stored_timing(old.timing, outcome.timing) {
                        tracing::debug!(checksum = %checksum, old = ?old.timing, new = ?outcome.timing,
                            "stored timing not improved, keeping best");
                        ops.push(ResultOp::Bump {
                            checksum: checksum.clone(),
                            revision: rev.id.clone(),
                        });
                    } else {
                        tracing::debug!(checksum = %checksum, old = ?old.timing, new = ?outcome.timing,
                            "better timing, replacing stored result");
                        ops.push(ResultOp::Replace(row));
                    }
                    continue;
                }
            }
            ops.push(ResultOp::Insert(row));
        }
        self.store.apply_result_ops(&ops)?;

        Ok(RunOutcome {
            any_succeeded,
            n_active: active.len(),
        })
    }

    /// Benchmarks eligible to run at this revision: past their start date,
    /// and either never measured here, or (under `min`) measured
    /// successfully but with a best timing not yet stable.
    fn active_benchmarks(&self, rev: &RevisionInfo) -> anyhow::Result<Vec<Benchmark>> {
        let existing = self.store.results_for_revision(&rev.id)?;
        let rerun_good_ones = self.config.existing == ExistingPolicy::Min;
        let mut need = Vec::new();
        for b in &self.benchmarks {
            if let Some(start) = b.start_date {
                if start > rev.timestamp {
                    continue;
                }
            }
            match existing.get(&b.checksum) {
                None => need.push(b.clone()),
                Some(prev) if rerun_good_ones && prev.ncalls.is_some() => {
                    if prev.nnochange < self.config.nochange_rerun_limit {
                        tracing::debug!(name = %b.name, nnochange = prev.nnochange,
                            limit = self.config.nochange_rerun_limit, "re-running");
                        need.push(b.clone());
                    } else {
                        tracing::debug!(name = %b.name, nnochange = prev.nnochange,
                            "minimum timing stable, skipping");
                    }
                }
                Some(_) => {}
            }
        }
        Ok(need)
    }

    fn run_revision(
        &mut self,
        rev: &RevisionInfo,
        active: &[Benchmark],
    ) -> anyhow::Result<HashMap<String, OutcomeRecord>> {
        tracing::info!(rev = %rev.id, n = active.len(),
            authors = %rev.authors.join(", "), message = %rev.message,
            "running benchmarks for revision");
        for b in active {
            tracing::debug!(name = %b.name);
        }

        self.sandbox.switch_to_revision(&rev.id)?;

        let request = BenchRequest::new(active);
        let response = self.sandbox.run_benchmarks(&request)?;
        if response.version != WIRE_VERSION {
            anyhow::bail!(
                "sandbox wire version mismatch: got {}, expected {}",
                response.version,
                WIRE_VERSION
            );
        }
        if response.outcomes.is_empty() {
            tracing::warn!(rev = %rev.id, "sandbox produced no results for revision");
        }
        Ok(response.outcomes)
    }
}

/// True when the stored timing should be kept over the fresh one: the fresh
/// run failed, or it is not better by more than the relative margin.
fn keeps_stored_timing(old: Option<f64>, new: Option<f64>) -> bool {
    let Some(old) = old else {
        // The prior run failed; any fresh outcome replaces it.
        return false;
    };
    let Some(new) = new else {
        return true;
    };
    (old - new) / new < MIN_IMPROVEMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_stored_when_improvement_within_margin() {
        assert!(keeps_stored_timing(Some(2.0), Some(2.1)));
        assert!(keeps_stored_timing(Some(2.0), Some(1.995)));
        assert!(keeps_stored_timing(Some(2.0), None));
    }

    #[test]
    fn replaces_stored_on_real_improvement() {
        assert!(!keeps_stored_timing(Some(2.0), Some(1.9)));
        assert!(!keeps_stored_timing(Some(2.0), Some(1.98)));
        assert!(!keeps_stored_timing(None, Some(1.0)));
        assert!(!keeps_stored_timing(None, None));
    }
}
