use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::*;

impl ResultSink for ResultStore {
    fn begin_run(&self, state: &SearchRunState) -> Result<(), String> {
        let parameters = serde_json::to_string(&state.parameters)
            .map_err(|e| format!("failed to encode parameters: {e}"))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (
                run_id, status, method, scenario_type, reward_function, seed,
                total_iterations, parameters_json, started_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                state.run_id.to_string(),
                state.status.as_str(),
                state.method.as_str(),
                state.scenario_type,
                state.reward_function.as_str(),
                state.seed as i64,
                state.total_iterations as i64,
                parameters,
                state.started_at_unix_s as i64,
            ],
        )
        .map_err(|e| format!("insert run failed: {e}"))?;
        Ok(())
    }

    fn append_record(&self, run_id: Uuid, record: &SearchRecord) -> Result<(), String> {
        let vector = serde_json::to_string(&record.candidate_vector)
            .map_err(|e| format!("failed to encode vector: {e}"))?;
        let outcome = serde_json::to_string(&record.outcome)
            .map_err(|e| format!("failed to encode outcome: {e}"))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO search_records (
                run_id, scenario_number, iteration, method, vector_json, reward,
                valid, collision, outcome_json, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                run_id.to_string(),
                record.scenario_number as i64,
                record.iteration as i64,
                record.method.as_str(),
                vector,
                record.reward,
                record.outcome.valid,
                record.outcome.collision_occurred,
                outcome,
                record.timestamp_unix_s as i64,
            ],
        )
        .map_err(|e| format!("append record failed: {e}"))?;
        conn.execute(
            "UPDATE runs SET scenarios_executed = scenarios_executed + 1 WHERE run_id = ?1",
            params![run_id.to_string()],
        )
        .map_err(|e| format!("update run counters failed: {e}"))?;
        Ok(())
    }

    fn finalize_run(&self, state: &SearchRunState) -> Result<(), String> {
        let best = state
            .best_solution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| format!("failed to encode best solution: {e}"))?;
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE runs SET status = ?1, scenarios_executed = ?2, collision_found = ?3,
                        best_reward = ?4, best_json = ?5, failure_reason = ?6, finished_at = ?7
                 WHERE run_id = ?8",
                params![
                    state.status.as_str(),
                    state.scenarios_executed as i64,
                    state.collision_found,
                    state.best_reward(),
                    best,
                    state.failure_reason.as_deref(),
                    state.finished_at_unix_s.map(|v| v as i64),
                    state.run_id.to_string(),
                ],
            )
            .map_err(|e| format!("finalize run failed: {e}"))?;
        if updated == 0 {
            return Err(format!("run {} was never registered", state.run_id));
        }
        Ok(())
    }
}

const RUN_COLUMNS: &str = "run_id, status, method, scenario_type, reward_function, seed,
    total_iterations, scenarios_executed, collision_found, best_reward, best_json,
    failure_reason, started_at, finished_at";

impl ResultStore {
    pub fn get_run(&self, run_id: Uuid) -> Result<Option<StoredRun>, String> {
        let raw = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"),
                params![run_id.to_string()],
                RawRunRow::from_row,
            )
            .optional()
            .map_err(|e| format!("get run failed: {e}"))?
        };
        raw.map(RawRunRow::into_run).transpose()
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<StoredRun>, String> {
        let raws = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
                ))
                .map_err(|e| format!("list runs failed: {e}"))?;
            let rows = stmt
                .query_map(params![limit as i64], RawRunRow::from_row)
                .map_err(|e| format!("list runs failed: {e}"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("list runs failed: {e}"))?
        };
        raws.into_iter().map(RawRunRow::into_run).collect()
    }

    /// Search records of a run in append order.
    pub fn history(&self, run_id: Uuid) -> Result<Vec<SearchRecord>, String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT scenario_number, iteration, method, vector_json, reward, outcome_json,
                        created_at
                 FROM search_records WHERE run_id = ?1 ORDER BY scenario_number",
            )
            .map_err(|e| format!("history query failed: {e}"))?;
        let rows = stmt
            .query_map(params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(|e| format!("history query failed: {e}"))?;

        let mut records = Vec::new();
        for row in rows {
            let (scenario_number, iteration, method, vector, reward, outcome, created_at) =
                row.map_err(|e| format!("history row failed: {e}"))?;
            records.push(SearchRecord {
                iteration: iteration as usize,
                scenario_number: scenario_number as u64,
                method: method
                    .parse()
                    .map_err(|e| format!("bad method in db: {e}"))?,
                candidate_vector: serde_json::from_str(&vector)
                    .map_err(|e| format!("bad vector in db: {e}"))?,
                reward,
                outcome: serde_json::from_str(&outcome)
                    .map_err(|e| format!("bad outcome in db: {e}"))?,
                timestamp_unix_s: created_at as u64,
            });
        }
        Ok(records)
    }
}

struct RawRunRow {
    run_id: String,
    status: String,
    method: String,
    scenario_type: String,
    reward_function: String,
    seed: i64,
    total_iterations: i64,
    scenarios_executed: i64,
    collision_found: bool,
    best_reward: Option<f64>,
    best_json: Option<String>,
    failure_reason: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
}

impl RawRunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            status: row.get(1)?,
            method: row.get(2)?,
            scenario_type: row.get(3)?,
            reward_function: row.get(4)?,
            seed: row.get(5)?,
            total_iterations: row.get(6)?,
            scenarios_executed: row.get(7)?,
            collision_found: row.get(8)?,
            best_reward: row.get(9)?,
            best_json: row.get(10)?,
            failure_reason: row.get(11)?,
            started_at: row.get(12)?,
            finished_at: row.get(13)?,
        })
    }

    fn into_run(self) -> Result<StoredRun, String> {
        let run_id = Uuid::parse_str(&self.run_id).map_err(|e| format!("bad uuid in db: {e}"))?;
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| format!("unknown run status in db: {}", self.status))?;
        let best = match self.best_json {
            Some(json) => match serde_json::from_str::<BestSolution>(&json) {
                Ok(best) => Some(best),
                Err(e) => {
                    tracing::warn!(run_id = %run_id, "unreadable best solution: {e}");
                    None
                }
            },
            None => None,
        };
        Ok(StoredRun {
            run_id,
            status,
            method: self.method,
            scenario_type: self.scenario_type,
            reward_function: self.reward_function,
            seed: self.seed as u64,
            total_iterations: self.total_iterations as usize,
            scenarios_executed: self.scenarios_executed as usize,
            collision_found: self.collision_found,
            best_reward: self.best_reward,
            best,
            failure_reason: self.failure_reason,
            started_at_unix_s: self.started_at as u64,
            finished_at_unix_s: self.finished_at.map(|v| v as u64),
        })
    }
}
