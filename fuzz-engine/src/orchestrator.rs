use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};

use scenario_fuzz_core::{
    build_strategy, discover, ranges::Range, Bounds, Outcome, ParameterSpec, RangeConfiguration,
    RewardFunction, ScenarioDescription, SearchConfig, SearchStrategy,
};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::EngineSettings;
use crate::error::FuzzError;
use crate::executor::{EvaluationFailure, EvaluationRequest, ExecutorState, ScenarioExecutor};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::state::{RunStatus, SearchRecord, SearchRunState};
use crate::store::ResultSink;
use crate::util::now_unix_s;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scenario: ScenarioDescription,
    pub search: SearchConfig,
    pub iteration_budget: usize,
    pub evaluation_timeout: Duration,
    /// Proactive executor restart interval in evaluations; 0 disables it.
    pub restart_gap: usize,
    pub seed: u64,
    pub reward: RewardFunction,
    pub user_overrides: HashMap<String, Range>,
    /// Consecutive invalid outcomes tolerated before the run is failed.
    pub max_consecutive_failures: usize,
    pub stop_on_collision: bool,
    pub progress_window: usize,
}

impl RunRequest {
    pub fn new(scenario: ScenarioDescription, search: SearchConfig) -> Self {
        Self::from_settings(&EngineSettings::default(), scenario, search)
    }

    pub fn from_settings(
        settings: &EngineSettings,
        scenario: ScenarioDescription,
        search: SearchConfig,
    ) -> Self {
        Self {
            scenario,
            search,
            iteration_budget: 10,
            evaluation_timeout: Duration::from_secs(settings.evaluation_timeout_secs),
            restart_gap: settings.restart_gap,
            seed: 42,
            reward: RewardFunction::default(),
            user_overrides: HashMap::new(),
            max_consecutive_failures: settings.max_consecutive_failures,
            stop_on_collision: false,
            progress_window: settings.progress_window,
        }
    }
}

/// A run whose parameters and bounds are resolved and whose strategy is built. Creating
/// one touches no simulator resources.
pub struct PreparedRun {
    pub run_id: Uuid,
    pub request: RunRequest,
    pub scenario_type: String,
    pub town: Option<String>,
    pub parameters: Vec<ParameterSpec>,
    strategy: Box<dyn SearchStrategy>,
}

impl PreparedRun {
    pub fn total_scenarios(&self) -> usize {
        self.strategy.total_evaluations()
    }
}

/// Per-run restart bookkeeping.
struct RestartPolicy {
    gap: usize,
    since_restart: usize,
    forced: bool,
}

impl RestartPolicy {
    fn reason(&self, state: ExecutorState) -> Option<&'static str> {
        if self.forced {
            Some("previous evaluation did not finish cleanly")
        } else {
            match state {
                ExecutorState::Ready if self.gap > 0 && self.since_restart >= self.gap => {
                    Some("periodic restart")
                }
                ExecutorState::Ready => None,
                ExecutorState::Stopped => Some("initial start"),
                ExecutorState::Crashed => Some("crash detected"),
                ExecutorState::Starting | ExecutorState::Evaluating => Some("executor not ready"),
            }
        }
    }
}

pub struct Orchestrator {
    ranges: Arc<RangeConfiguration>,
    store: Arc<dyn ResultSink>,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    pub fn new(
        ranges: Arc<RangeConfiguration>,
        store: Arc<dyn ResultSink>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            ranges,
            store,
            progress,
        }
    }

    /// Discover parameters, resolve their ranges and build the search strategy. Every
    /// setup error surfaces here, before any simulator is launched.
    pub fn prepare(&self, request: RunRequest) -> Result<PreparedRun, FuzzError> {
        let discovered = discover(&request.scenario)?;
        let mut parameters = discovered.parameters;
        self.ranges
            .resolve_all(&mut parameters, &request.user_overrides)?;

        let bounds = Bounds::from_specs(&parameters)?;
        let strategy = build_strategy(
            &request.search,
            bounds,
            request.iteration_budget,
            request.seed,
        )?;

        let run_id = Uuid::new_v4();
        for spec in &parameters {
            tracing::debug!(
                run_id = %run_id,
                parameter = %spec.name,
                scenario = %spec.scenario_instance,
                lower = spec.lower_bound,
                upper = spec.upper_bound,
                "search bound"
            );
        }

        Ok(PreparedRun {
            run_id,
            scenario_type: discovered.scenario_type,
            town: discovered.town,
            parameters,
            strategy,
            request,
        })
    }

    pub async fn run(
        &self,
        request: RunRequest,
        executor: &mut dyn ScenarioExecutor,
        cancel: &CancellationToken,
    ) -> Result<SearchRunState, FuzzError> {
        let prepared = self.prepare(request)?;
        Ok(self.execute(prepared, executor, cancel).await)
    }

    /// Drive a prepared run to a terminal state. Evaluation failures become penalized
    /// invalid outcomes; nothing in here returns an error.
    pub async fn execute(
        &self,
        prepared: PreparedRun,
        executor: &mut dyn ScenarioExecutor,
        cancel: &CancellationToken,
    ) -> SearchRunState {
        let PreparedRun {
            run_id,
            request,
            scenario_type,
            town,
            parameters,
            mut strategy,
        } = prepared;

        let mut state = SearchRunState {
            run_id,
            status: RunStatus::Running,
            method: strategy.method(),
            scenario_type,
            town,
            reward_function: request.reward,
            seed: request.seed,
            parameters,
            total_iterations: request.iteration_budget,
            total_scenarios: strategy.total_evaluations(),
            current_iteration: 0,
            scenarios_executed: 0,
            population_size: strategy.population_size(),
            population: strategy.population(),
            best_solution: None,
            history: Vec::new(),
            collision_found: false,
            failure_reason: None,
            started_at_unix_s: now_unix_s(),
            finished_at_unix_s: None,
        };

        if let Err(e) = self.store.begin_run(&state) {
            tracing::warn!(run_id = %run_id, "failed to register run in result store: {e}");
        }
        tracing::info!(
            run_id = %run_id,
            method = state.method.as_str(),
            scenario_type = %state.scenario_type,
            parameters = state.parameters.len(),
            iterations = state.total_iterations,
            evaluations = state.total_scenarios,
            reward = request.reward.as_str(),
            seed = request.seed,
            "fuzzing run started"
        );

        let started = Instant::now();
        let mut restart = RestartPolicy {
            gap: request.restart_gap,
            since_restart: 0,
            forced: false,
        };
        let mut consecutive_failures = 0usize;
        let mut scenario_number = 0u64;

        loop {
            if cancel.is_cancelled() {
                strategy.abort();
                state.status = RunStatus::Stopped;
                tracing::info!(
                    run_id = %run_id,
                    executed = state.scenarios_executed,
                    "cancellation requested, stopping run"
                );
                break;
            }

            let Some(vector) = strategy.propose_next() else {
                state.status = RunStatus::Completed;
                break;
            };
            let iteration = strategy.iteration();
            scenario_number += 1;

            let outcome = match self
                .ensure_ready(executor, &mut restart, request.evaluation_timeout, run_id)
                .await
            {
                Ok(()) => {
                    self.evaluate(
                        executor,
                        &request,
                        &state.parameters,
                        &vector,
                        scenario_number,
                        &mut restart,
                    )
                    .await
                }
                Err(failure) => {
                    restart.forced = true;
                    Outcome::invalid(scenario_number, failure.to_string())
                }
            };
            restart.since_restart += 1;

            let reward = request.reward.score(&outcome);
            if let Err(e) = strategy.absorb(&vector, reward) {
                tracing::error!(run_id = %run_id, "search strategy rejected result: {e}");
                state.status = RunStatus::Failed;
                state.failure_reason = Some(format!("search strategy error: {e}"));
                break;
            }

            if outcome.valid {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
            }
            let failure = outcome.failure.clone();

            let record = SearchRecord {
                iteration,
                scenario_number,
                method: state.method,
                candidate_vector: vector,
                reward,
                outcome,
                timestamp_unix_s: now_unix_s(),
            };
            if let Err(e) = self.store.append_record(run_id, &record) {
                tracing::warn!(
                    run_id = %run_id,
                    scenario_number,
                    "failed to persist search record: {e}"
                );
            }
            if state.record(record) {
                tracing::info!(
                    run_id = %run_id,
                    scenario_number,
                    iteration,
                    reward,
                    collision_found = state.collision_found,
                    "new best solution"
                );
            }
            state.population = strategy.population();
            self.progress.emit(&ProgressEvent::snapshot(
                &state,
                started.elapsed(),
                request.progress_window,
            ));

            if consecutive_failures > request.max_consecutive_failures {
                strategy.abort();
                state.status = RunStatus::Failed;
                state.failure_reason = Some(format!(
                    "{consecutive_failures} consecutive evaluation failures; last: {}",
                    failure.unwrap_or_else(|| "unknown".to_string())
                ));
                tracing::error!(
                    run_id = %run_id,
                    consecutive_failures,
                    "executor presumed unrecoverable, aborting run"
                );
                break;
            }

            if request.stop_on_collision && state.collision_found {
                strategy.abort();
                state.status = RunStatus::Completed;
                tracing::info!(run_id = %run_id, scenario_number, "collision found, stopping early");
                break;
            }
        }

        executor.shutdown().await;
        state.finished_at_unix_s = Some(now_unix_s());
        if let Err(e) = self.store.finalize_run(&state) {
            tracing::warn!(run_id = %run_id, "failed to finalize run in result store: {e}");
        }
        self.progress.emit(&ProgressEvent::snapshot(
            &state,
            started.elapsed(),
            request.progress_window,
        ));
        tracing::info!(
            run_id = %run_id,
            status = state.status.as_str(),
            executed = state.scenarios_executed,
            best_reward = ?state.best_reward(),
            collision_found = state.collision_found,
            elapsed_s = started.elapsed().as_secs(),
            "fuzzing run finished"
        );
        state
    }

    async fn ensure_ready(
        &self,
        executor: &mut dyn ScenarioExecutor,
        restart: &mut RestartPolicy,
        timeout: Duration,
        run_id: Uuid,
    ) -> Result<(), EvaluationFailure> {
        let current = executor.poll_health();
        let Some(reason) = restart.reason(current) else {
            return Ok(());
        };

        match current {
            ExecutorState::Stopped | ExecutorState::Ready => {
                tracing::info!(run_id = %run_id, reason, "restarting executor")
            }
            _ => tracing::warn!(
                run_id = %run_id,
                reason,
                state = current.as_str(),
                "restarting executor"
            ),
        }
        restart.forced = false;
        restart.since_restart = 0;

        tokio::select! {
            result = executor.restart() => result,
            _ = tokio::time::sleep(timeout) => {
                tracing::error!(run_id = %run_id, timeout_secs = timeout.as_secs(), "executor restart timed out");
                Err(EvaluationFailure::Timeout { after: timeout })
            }
        }
    }

    async fn evaluate(
        &self,
        executor: &mut dyn ScenarioExecutor,
        request: &RunRequest,
        parameters: &[ParameterSpec],
        vector: &[f64],
        scenario_number: u64,
        restart: &mut RestartPolicy,
    ) -> Outcome {
        let evaluation = EvaluationRequest {
            run_number: scenario_number,
            parameters,
            vector,
            timeout: request.evaluation_timeout,
        };

        let result = tokio::select! {
            result = executor.evaluate(&evaluation) => result,
            _ = tokio::time::sleep(request.evaluation_timeout) => {
                Err(EvaluationFailure::Timeout { after: request.evaluation_timeout })
            }
        };

        match result {
            Ok(mut outcome) => {
                outcome.run_number = scenario_number;
                outcome
            }
            Err(failure) => {
                if failure.needs_restart() {
                    restart.forced = true;
                }
                tracing::warn!(scenario_number, "evaluation failed: {failure}");
                Outcome::invalid(scenario_number, failure.to_string())
            }
        }
    }
}
