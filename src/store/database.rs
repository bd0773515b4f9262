//! Trace Store
//!
//! SQLite-backed archive of runs. Uses rusqlite for synchronous,
//! single-process access; every save is one transaction, so a failed
//! write never leaves a partial run behind.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::types::{RunMeta, RunResult, StoredRun};

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    version     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    meta_json   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS results (
    id          TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL REFERENCES runs(id),
    scenario    TEXT NOT NULL,
    passed      INTEGER NOT NULL,
    score       REAL NOT NULL,
    data_json   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_run_id   ON results(run_id);
CREATE INDEX IF NOT EXISTS idx_results_scenario ON results(scenario);
CREATE INDEX IF NOT EXISTS idx_runs_version     ON runs(version);
";

/// Handle to the versioned run archive.
pub struct TraceStore {
    conn: Connection,
}

impl TraceStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create trace directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open trace store: {db_path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(CREATE_TABLES)
            .context("failed to create trace tables")?;

        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self { conn })
    }

    /// Persist a run and all its results in one transaction.
    pub fn save_run(&mut self, run: &StoredRun) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO runs (id, version, created_at, meta_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                run.meta.id,
                run.meta.version,
                run.meta.created_at,
                serde_json::to_string(&run.meta)?,
            ],
        )?;

        for result in &run.results {
            tx.execute(
                "INSERT INTO results (id, run_id, scenario, passed, score, data_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    run.meta.id,
                    result.scenario,
                    result.passed as i32,
                    result.score,
                    serde_json::to_string(result)?,
                    run.meta.created_at,
                ],
            )?;
        }

        tx.commit().context("failed to commit run")?;
        Ok(())
    }

    /// Load a run by its opaque id.
    pub fn load_run(&self, id: &str) -> Result<Option<StoredRun>> {
        let meta_json: Option<String> = self
            .conn
            .query_row(
                "SELECT meta_json FROM runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(meta_json) = meta_json else {
            return Ok(None);
        };
        let meta: RunMeta =
            serde_json::from_str(&meta_json).context("corrupt run metadata")?;

        let mut stmt = self
            .conn
            .prepare("SELECT data_json FROM results WHERE run_id = ?1 ORDER BY rowid")?;
        let results: Vec<RunResult> = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect();

        Ok(Some(StoredRun { meta, results }))
    }

    /// Resolve a version label to its most recent run. A label with no
    /// runs yields `None`, not an error.
    pub fn load_by_version(&self, version: &str) -> Result<Option<StoredRun>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM runs WHERE version = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![version],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => self.load_run(&id),
            None => Ok(None),
        }
    }

    /// All version labels, most recent first.
    pub fn list_versions(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT version FROM runs GROUP BY version ORDER BY MAX(created_at) DESC",
        )?;
        let versions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssertionKind, AssertionResult};

    fn result(name: &str, passed: bool, score: f64) -> RunResult {
        RunResult {
            scenario: name.to_string(),
            passed,
            score,
            assertions: vec![AssertionResult {
                kind: AssertionKind::Contains,
                passed,
                expected: Some("something".to_string()),
                actual: None,
                reasoning: None,
                latency_ms: None,
                error: None,
            }],
            turns: Vec::new(),
            duration_ms: 42,
            error: None,
        }
    }

    fn run(id: &str, version: &str, created_at: &str, results: Vec<RunResult>) -> StoredRun {
        let passed = results.iter().filter(|r| r.passed).count();
        StoredRun {
            meta: RunMeta {
                id: id.to_string(),
                version: version.to_string(),
                created_at: created_at.to_string(),
                total: results.len(),
                passed,
                failed: results.len() - passed,
                total_duration_ms: 42,
            },
            results,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut store = TraceStore::open_in_memory().unwrap();
        let stored = run(
            "run-1",
            "v1",
            "2025-01-01T00:00:00Z",
            vec![result("greeting", true, 1.0), result("refund", false, 0.5)],
        );
        store.save_run(&stored).unwrap();

        let loaded = store.load_run("run-1").unwrap().unwrap();
        assert_eq!(loaded.meta.version, "v1");
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(loaded.results[0].scenario, "greeting");
        assert_eq!(loaded.results[1].score, 0.5);
    }

    #[test]
    fn test_load_by_version_picks_most_recent() {
        let mut store = TraceStore::open_in_memory().unwrap();
        store
            .save_run(&run("run-1", "v1", "2025-01-01T00:00:00Z", vec![result("a", true, 1.0)]))
            .unwrap();
        store
            .save_run(&run("run-2", "v1", "2025-01-02T00:00:00Z", vec![result("b", true, 1.0)]))
            .unwrap();

        let loaded = store.load_by_version("v1").unwrap().unwrap();
        assert_eq!(loaded.meta.id, "run-2");
    }

    #[test]
    fn test_load_missing_version_is_none() {
        let store = TraceStore::open_in_memory().unwrap();
        assert!(store.load_by_version("ghost").unwrap().is_none());
        assert!(store.load_run("ghost").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_run_id_rolls_back_cleanly() {
        let mut store = TraceStore::open_in_memory().unwrap();
        let first = run("run-1", "v1", "2025-01-01T00:00:00Z", vec![result("a", true, 1.0)]);
        store.save_run(&first).unwrap();

        // Same primary key: the insert fails and nothing of the second
        // run's results is persisted.
        let second = run("run-1", "v2", "2025-01-02T00:00:00Z", vec![result("b", true, 1.0)]);
        assert!(store.save_run(&second).is_err());
        assert!(store.load_by_version("v2").unwrap().is_none());

        let loaded = store.load_run("run-1").unwrap().unwrap();
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.results[0].scenario, "a");
    }

    #[test]
    fn test_list_versions() {
        let mut store = TraceStore::open_in_memory().unwrap();
        store
            .save_run(&run("run-1", "v1", "2025-01-01T00:00:00Z", vec![]))
            .unwrap();
        store
            .save_run(&run("run-2", "v2", "2025-01-03T00:00:00Z", vec![]))
            .unwrap();
        store
            .save_run(&run("run-3", "v1", "2025-01-02T00:00:00Z", vec![]))
            .unwrap();

        assert_eq!(store.list_versions().unwrap(), vec!["v2", "v1"]);
    }
}
