pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS benchmarks (
  checksum TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT
);

CREATE TABLE IF NOT EXISTS results (
  checksum TEXT NOT NULL,
  revision TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  ncalls INTEGER,
  timing REAL,
  traceback TEXT,
  nnochange INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (checksum, revision)
);

CREATE TABLE IF NOT EXISTS blacklist (
  revision TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS branches (
  branch TEXT NOT NULL,
  revision TEXT NOT NULL,
  PRIMARY KEY (branch, revision)
);

CREATE INDEX IF NOT EXISTS idx_results_revision ON results(revision);
"#;
