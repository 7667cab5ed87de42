mod db;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::state::{BestSolution, RunStatus, SearchRecord, SearchRunState};
use crate::util::now_unix_s;

/// Append-only sink for run results, called from the run loop.
///
/// Failures are reported to the caller, which logs them and keeps running; a broken
/// store never aborts a search.
pub trait ResultSink: Send + Sync {
    fn begin_run(&self, state: &SearchRunState) -> Result<(), String>;
    fn append_record(&self, run_id: Uuid, record: &SearchRecord) -> Result<(), String>;
    fn finalize_run(&self, state: &SearchRunState) -> Result<(), String>;
}

/// Row summary of a stored run.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub method: String,
    pub scenario_type: String,
    pub reward_function: String,
    pub seed: u64,
    pub total_iterations: usize,
    pub scenarios_executed: usize,
    pub collision_found: bool,
    pub best_reward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best: Option<BestSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub started_at_unix_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_unix_s: Option<u64>,
}

/// SQLite-backed result store under `{data_dir}/results.db`.
pub struct ResultStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ResultStore {
    /// Open (or create) the database.
    ///
    /// Runs left `running` by a previous process are marked `failed` with reason
    /// "engine restarted"; their records are kept.
    pub fn open(data_dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create data dir {}: {e}", data_dir.display()))?;

        let path = data_dir.join("results.db");
        let conn = Connection::open(&path)
            .map_err(|e| format!("failed to open SQLite at {}: {e}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;",
        )
        .map_err(|e| format!("failed to set pragmas: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id              TEXT PRIMARY KEY,
                status              TEXT NOT NULL,
                method              TEXT NOT NULL,
                scenario_type       TEXT NOT NULL,
                reward_function     TEXT NOT NULL,
                seed                INTEGER NOT NULL,
                total_iterations    INTEGER NOT NULL,
                parameters_json     TEXT NOT NULL,
                scenarios_executed  INTEGER NOT NULL DEFAULT 0,
                collision_found     INTEGER NOT NULL DEFAULT 0,
                best_reward         REAL,
                best_json           TEXT,
                failure_reason      TEXT,
                started_at          INTEGER NOT NULL,
                finished_at         INTEGER
             );
             CREATE TABLE IF NOT EXISTS search_records (
                run_id              TEXT NOT NULL,
                scenario_number     INTEGER NOT NULL,
                iteration           INTEGER NOT NULL,
                method              TEXT NOT NULL,
                vector_json         TEXT NOT NULL,
                reward              REAL NOT NULL,
                valid               INTEGER NOT NULL,
                collision           INTEGER NOT NULL,
                outcome_json        TEXT NOT NULL,
                created_at          INTEGER NOT NULL,
                PRIMARY KEY (run_id, scenario_number)
             );
             CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);",
        )
        .map_err(|e| format!("failed to create schema: {e}"))?;

        let store = Self {
            conn: Mutex::new(conn),
            path,
        };

        let recovered = store.recover_on_startup()?;
        if recovered > 0 {
            tracing::warn!(recovered, "marked orphaned running runs as failed");
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, String> {
        self.conn
            .lock()
            .map_err(|_| "result store lock poisoned".to_string())
    }

    fn recover_on_startup(&self) -> Result<usize, String> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE runs SET status = 'failed', failure_reason = 'engine restarted',
                        finished_at = ?1
                 WHERE status = 'running'",
                params![now_unix_s() as i64],
            )
            .map_err(|e| format!("recover_on_startup failed: {e}"))?;
        Ok(updated)
    }
}
