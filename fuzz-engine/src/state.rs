use std::collections::BTreeMap;

use scenario_fuzz_core::{CandidateVector, Outcome, ParameterSpec, RewardFunction, SearchMethod};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// One completed evaluation. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRecord {
    pub iteration: usize,
    pub scenario_number: u64,
    pub method: SearchMethod,
    pub candidate_vector: CandidateVector,
    pub reward: f64,
    pub outcome: Outcome,
    pub timestamp_unix_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BestSolution {
    pub candidate_vector: CandidateVector,
    pub reward: f64,
    pub outcome: Outcome,
    pub scenario_number: u64,
    pub iteration: usize,
}

impl From<&SearchRecord> for BestSolution {
    fn from(record: &SearchRecord) -> Self {
        Self {
            candidate_vector: record.candidate_vector.clone(),
            reward: record.reward,
            outcome: record.outcome.clone(),
            scenario_number: record.scenario_number,
            iteration: record.iteration,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub method: SearchMethod,
    pub scenario_type: String,
    pub town: Option<String>,
    pub reward_function: RewardFunction,
    pub seed: u64,
    pub parameters: Vec<ParameterSpec>,
    pub total_iterations: usize,
    pub total_scenarios: usize,
    pub current_iteration: usize,
    pub scenarios_executed: usize,
    pub population_size: usize,
    pub population: Vec<CandidateVector>,
    pub best_solution: Option<BestSolution>,
    pub history: Vec<SearchRecord>,
    pub collision_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub started_at_unix_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_unix_s: Option<u64>,
}

impl SearchRunState {
    /// Append a record and update best-so-far. Returns true when the best improved.
    ///
    /// The best only moves on a strictly lower reward, so ties keep the earlier record.
    /// `collision_found` is never cleared once set.
    pub fn record(&mut self, record: SearchRecord) -> bool {
        self.scenarios_executed += 1;
        self.current_iteration = record.iteration;
        if record.outcome.valid && record.outcome.collision_occurred {
            self.collision_found = true;
        }

        let improved = match &self.best_solution {
            Some(best) => record.reward < best.reward,
            None => true,
        };
        if improved {
            self.best_solution = Some(BestSolution::from(&record));
        }
        self.history.push(record);
        improved
    }

    pub fn best_reward(&self) -> Option<f64> {
        self.best_solution.as_ref().map(|b| b.reward)
    }

    pub fn recent_rewards(&self, window: usize) -> Vec<f64> {
        let skip = self.history.len().saturating_sub(window);
        self.history.iter().skip(skip).map(|r| r.reward).collect()
    }

    /// Best vector keyed by `scenario_instance.parameter`.
    pub fn best_parameters(&self) -> BTreeMap<String, f64> {
        let Some(best) = &self.best_solution else {
            return BTreeMap::new();
        };
        self.parameters
            .iter()
            .zip(&best.candidate_vector)
            .map(|(spec, value)| (format!("{}.{}", spec.scenario_instance, spec.name), *value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SearchRunState {
        SearchRunState {
            run_id: Uuid::new_v4(),
            status: RunStatus::Running,
            method: SearchMethod::Random,
            scenario_type: "CutIn".to_string(),
            town: None,
            reward_function: RewardFunction::Ttc,
            seed: 42,
            parameters: Vec::new(),
            total_iterations: 4,
            total_scenarios: 4,
            current_iteration: 0,
            scenarios_executed: 0,
            population_size: 1,
            population: Vec::new(),
            best_solution: None,
            history: Vec::new(),
            collision_found: false,
            failure_reason: None,
            started_at_unix_s: 0,
            finished_at_unix_s: None,
        }
    }

    fn record(n: u64, reward: f64, collision: bool) -> SearchRecord {
        let mut outcome = Outcome::invalid(n, "unused");
        outcome.valid = true;
        outcome.failure = None;
        outcome.collision_occurred = collision;
        SearchRecord {
            iteration: n as usize,
            scenario_number: n,
            method: SearchMethod::Random,
            candidate_vector: vec![n as f64],
            reward,
            outcome,
            timestamp_unix_s: 0,
        }
    }

    #[test]
    fn best_only_moves_on_strict_improvement() {
        let mut s = state();
        assert!(s.record(record(1, 5.0, false)));
        assert!(!s.record(record(2, 5.0, false)));
        assert!(s.record(record(3, 2.0, false)));
        assert!(!s.record(record(4, 9.0, false)));

        let best = s.best_solution.as_ref().unwrap();
        assert_eq!(best.scenario_number, 3);
        assert_eq!(s.scenarios_executed, 4);
        assert_eq!(s.recent_rewards(2), vec![2.0, 9.0]);
    }

    #[test]
    fn collision_flag_is_sticky() {
        let mut s = state();
        s.record(record(1, 0.0, true));
        s.record(record(2, 3.0, false));
        assert!(s.collision_found);
    }
}
