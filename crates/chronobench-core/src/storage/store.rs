use crate::errors::StoreIntegrityError;
use crate::model::{Benchmark, ResultRow};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Durable, checksum-indexed persistence for benchmark definitions, timing
/// results, the revision blacklist and branch membership. Holds no
/// scheduling policy: the engine decides what to write, the store decides
/// how (and guarantees atomicity per batch).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// One write against the results table. The engine composes these per
/// revision and commits them through [`Store::apply_result_ops`] so a
/// revision's outcomes land atomically.
#[derive(Debug, Clone)]
pub enum ResultOp {
    /// Insert a fresh row; fails typed if the (checksum, revision) pair
    /// already exists.
    Insert(ResultRow),
    /// Delete the existing row for the pair, then insert the new one.
    Replace(ResultRow),
    /// Increment the no-change counter of an existing row.
    Bump { checksum: String, revision: String },
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    // --- benchmarks ---

    /// Insert the benchmark, or update name/description if the checksum is
    /// already registered. Never errors on a duplicate checksum.
    pub fn upsert_benchmark(&self, b: &Benchmark) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO benchmarks(checksum, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(checksum) DO UPDATE SET name=excluded.name, description=excluded.description",
            params![b.checksum, b.name, b.description],
        )
        .context("upsert benchmark")?;
        Ok(())
    }

    /// Upsert a whole suite in one transaction.
    pub fn register_benchmarks(&self, benchmarks: &[Benchmark]) -> anyhow::Result<()> {
        tracing::info!(n = benchmarks.len(), "registering benchmarks");
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for b in benchmarks {
            tx.execute(
                "INSERT INTO benchmarks(checksum, name, description) VALUES (?1, ?2, ?3)
                 ON CONFLICT(checksum) DO UPDATE SET name=excluded.name, description=excluded.description",
                params![b.checksum, b.name, b.description],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// (checksum, name) of every registered benchmark.
    pub fn benchmarks(&self) -> anyhow::Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT checksum, name FROM benchmarks")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Deletes stored benchmarks whose checksum is absent from `current`,
    /// cascading to their results so no orphaned rows survive. Irreversible.
    pub fn reconcile_benchmarks(&self, current: &HashSet<String>) -> anyhow::Result<usize> {
        let stale: Vec<(String, String)> = self
            .benchmarks()?
            .into_iter()
            .filter(|(checksum, _)| !current.contains(checksum))
            .collect();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (checksum, name) in &stale {
            tracing::info!(checksum = %checksum, name = %name, "deleting benchmark no longer defined");
            tx.execute("DELETE FROM results WHERE checksum=?1", params![checksum])?;
            tx.execute("DELETE FROM benchmarks WHERE checksum=?1", params![checksum])?;
        }
        tx.commit()?;
        Ok(stale.len())
    }

    // --- results ---

    /// Inserts one result row. Fails with [`StoreIntegrityError`] if the
    /// (checksum, revision) pair already exists; callers must delete first
    /// to overwrite.
    pub fn write_result(&self, row: &ResultRow) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_result(&conn, row)
    }

    pub fn delete_results(&self, checksum: &str, rev: Option<&str>) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        match rev {
            Some(rev) => conn.execute(
                "DELETE FROM results WHERE checksum=?1 AND revision=?2",
                params![checksum, rev],
            )?,
            None => conn.execute("DELETE FROM results WHERE checksum=?1", params![checksum])?,
        };
        Ok(())
    }

    /// Deletes all results recorded for a revision.
    pub fn delete_revision_results(&self, rev: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM results WHERE revision=?1", params![rev])?;
        Ok(())
    }

    /// Drops every failed row (timing absent), returning how many went.
    pub fn delete_error_results(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM results WHERE timing IS NULL", [])?;
        Ok(n)
    }

    /// Atomically increments `nnochange` for one stored row; fails typed if
    /// the row does not exist.
    pub fn increment_nochange(&self, checksum: &str, rev: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        bump_nochange(&conn, checksum, rev)
    }

    /// All results recorded for a revision, keyed by benchmark checksum.
    pub fn results_for_revision(&self, rev: &str) -> anyhow::Result<HashMap<String, ResultRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT checksum, revision, timestamp, ncalls, timing, traceback, nnochange
             FROM results WHERE revision=?1",
        )?;
        let rows = stmt.query_map(params![rev], result_from_row)?;
        let mut out = HashMap::new();
        for r in rows {
            let row = r?;
            out.insert(row.checksum.clone(), row);
        }
        Ok(out)
    }

    /// Results for one benchmark, ordered by revision timestamp ascending,
    /// optionally restricted to a single revision.
    pub fn benchmark_results(
        &self,
        checksum: &str,
        rev: Option<&str>,
    ) -> anyhow::Result<Vec<ResultRow>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match rev {
            Some(rev) => {
                let mut stmt = conn.prepare(
                    "SELECT checksum, revision, timestamp, ncalls, timing, traceback, nnochange
                     FROM results WHERE checksum=?1 AND revision=?2 ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(params![checksum, rev], result_from_row)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT checksum, revision, timestamp, ncalls, timing, traceback, nnochange
                     FROM results WHERE checksum=?1 ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(params![checksum], result_from_row)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    /// Commits a batch of result writes in one transaction: either all of a
    /// revision's outcomes land, or none do.
    pub fn apply_result_ops(&self, ops: &[ResultOp]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                ResultOp::Insert(row) => insert_result(&tx, row)?,
                ResultOp::Replace(row) => {
                    tx.execute(
                        "DELETE FROM results WHERE checksum=?1 AND revision=?2",
                        params![row.checksum, row.revision],
                    )?;
                    insert_result(&tx, row)?;
                }
                ResultOp::Bump { checksum, revision } => bump_nochange(&tx, checksum, revision)?,
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- blacklist ---

    pub fn blacklist_add(&self, rev: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO blacklist(revision) VALUES (?1)",
            params![rev],
        )?;
        Ok(())
    }

    pub fn blacklist(&self) -> anyhow::Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT revision FROM blacklist")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for r in rows {
            out.insert(r?);
        }
        Ok(out)
    }

    pub fn blacklist_clear(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM blacklist", [])?;
        Ok(())
    }

    // --- branches ---

    /// Records that `branch` contains `rev`. Append-only and idempotent: a
    /// membership row is never deleted, so "was ever on branch X" survives
    /// upstream branch deletion.
    pub fn branch_add(&self, branch: &str, rev: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO branches(branch, revision) VALUES (?1, ?2)",
            params![branch, rev],
        )?;
        Ok(())
    }

    pub fn branches(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT branch FROM branches ORDER BY branch")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn branch_revisions(&self, branch: &str) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT revision FROM branches WHERE branch=?1")?;
        let rows = stmt.query_map(params![branch], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn revision_branches(&self, rev: &str) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT branch FROM branches WHERE revision=?1 ORDER BY branch")?;
        let rows = stmt.query_map(params![rev], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn insert_result(conn: &Connection, row: &ResultRow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO results(checksum, revision, timestamp, ncalls, timing, traceback, nnochange)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.checksum,
            row.revision,
            row.timestamp.to_rfc3339(),
            row.ncalls,
            row.timing,
            row.traceback,
            row.nnochange
        ],
    )
    .map_err(|e| {
        map_constraint(
            e,
            format!(
                "result already stored for benchmark {} at revision {}",
                row.checksum, row.revision
            ),
        )
    })?;
    Ok(())
}

fn bump_nochange(conn: &Connection, checksum: &str, rev: &str) -> anyhow::Result<()> {
    let n = conn.execute(
        "UPDATE results SET nnochange = nnochange + 1 WHERE checksum=?1 AND revision=?2",
        params![checksum, rev],
    )?;
    if n == 0 {
        return Err(anyhow::Error::new(StoreIntegrityError(format!(
            "no stored result for benchmark {} at revision {}",
            checksum, rev
        ))));
    }
    Ok(())
}

/// Constraint violations become typed integrity errors; everything else
/// (connectivity, corruption) stays a raw store error and is fatal upstream.
fn map_constraint(e: rusqlite::Error, what: String) -> anyhow::Error {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            anyhow::Error::new(StoreIntegrityError(what))
        }
        _ => anyhow::Error::new(e),
    }
}

fn result_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    let ts: String = row.get(2)?;
    Ok(ResultRow {
        checksum: row.get(0)?,
        revision: row.get(1)?,
        timestamp: parse_ts(&ts)?,
        ncalls: row.get(3)?,
        timing: row.get(4)?,
        traceback: row.get(5)?,
        nnochange: row.get(6)?,
    })
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })
}
