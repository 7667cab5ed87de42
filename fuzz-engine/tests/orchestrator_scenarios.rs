use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use scenario_fuzz::{
    CancellationToken, EvaluationFailure, EvaluationRequest, ExecutorState, FuzzError,
    Orchestrator, ProgressEvent, ProgressSink, ResultStore, RunManager, RunRequest, RunStatus,
    ScenarioExecutor,
};
use scenario_fuzz_core::{
    GaParams, Outcome, PsoParams, RangeConfiguration, RewardFunction, ScenarioDescription,
    SearchConfig, SearchMethod, PENALTY_REWARD,
};
use tempfile::TempDir;

const ROUTE_XML: &str = r#"<routes>
  <route id="1" town="Town05">
    <scenarios>
      <scenario name="CutIn_1" type="ParkingCutIn">
        <absolute_v value="15.0" fuzz="true"/>
        <relative_p value="30" fuzz="true"/>
      </scenario>
    </scenarios>
  </route>
</routes>
"#;

#[derive(Clone, Copy)]
enum Behavior {
    /// Every evaluation collides.
    Collide,
    /// Valid outcome with `min_ttc` equal to the first vector component.
    TtcFromVector,
    /// Never returns; the orchestrator's timeout must fire.
    Hang,
    /// Simulator crashes on every evaluation.
    Crash,
    /// Reports a crash while the health check still says `Ready`.
    CrashStaysReady,
}

struct StubExecutor {
    behavior: Behavior,
    state: ExecutorState,
    restarts: Arc<AtomicUsize>,
    evaluations: Arc<AtomicUsize>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl StubExecutor {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            state: ExecutorState::Stopped,
            restarts: Arc::new(AtomicUsize::new(0)),
            evaluations: Arc::new(AtomicUsize::new(0)),
            cancel_after: None,
        }
    }
}

#[async_trait]
impl ScenarioExecutor for StubExecutor {
    fn state(&self) -> ExecutorState {
        self.state
    }

    async fn evaluate(
        &mut self,
        request: &EvaluationRequest<'_>,
    ) -> Result<Outcome, EvaluationFailure> {
        let done = self.evaluations.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_after {
            if done >= *limit {
                token.cancel();
            }
        }

        let mut outcome = Outcome {
            collision_occurred: false,
            min_time_to_collision: None,
            min_distance: Some(20.0),
            ego: None,
            npc: None,
            run_number: request.run_number,
            valid: true,
            failure: None,
        };
        match self.behavior {
            Behavior::Collide => {
                outcome.collision_occurred = true;
                outcome.min_time_to_collision = Some(0.0);
                Ok(outcome)
            }
            Behavior::TtcFromVector => {
                outcome.min_time_to_collision = Some(request.vector[0]);
                Ok(outcome)
            }
            Behavior::Hang => {
                self.state = ExecutorState::Evaluating;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(outcome)
            }
            Behavior::Crash => {
                self.state = ExecutorState::Crashed;
                Err(EvaluationFailure::Crashed {
                    reason: "simulator exited with status 1".to_string(),
                })
            }
            Behavior::CrashStaysReady => Err(EvaluationFailure::Crashed {
                reason: "lost connection to simulator".to_string(),
            }),
        }
    }

    async fn restart(&mut self) -> Result<(), EvaluationFailure> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.state = ExecutorState::Ready;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.state = ExecutorState::Stopped;
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<ResultStore>,
    progress: Arc<RecordingProgress>,
    _dir: TempDir,
}

fn harness() -> Result<Harness> {
    let dir = TempDir::new()?;
    let store = Arc::new(ResultStore::open(dir.path()).map_err(anyhow::Error::msg)?);
    let progress = Arc::new(RecordingProgress::default());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(RangeConfiguration::builtin()),
        store.clone(),
        progress.clone(),
    ));
    Ok(Harness {
        orchestrator,
        store,
        progress,
        _dir: dir,
    })
}

fn request(search: SearchConfig, iterations: usize) -> RunRequest {
    let mut request = RunRequest::new(ScenarioDescription::new(ROUTE_XML, None), search);
    request.iteration_budget = iterations;
    request.evaluation_timeout = Duration::from_secs(5);
    request.restart_gap = 0;
    request.max_consecutive_failures = 100;
    request
}

#[tokio::test]
async fn collision_stub_reaches_zero_reward() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::Collide);
    let state = h
        .orchestrator
        .run(
            request(SearchConfig::new(SearchMethod::Random), 5),
            &mut executor,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.history.len(), 5);
    assert!(state.collision_found);
    assert_eq!(state.best_reward(), Some(0.0));
    assert_eq!(state.best_solution.as_ref().unwrap().scenario_number, 1);

    let stored = h.store.get_run(state.run_id).map_err(anyhow::Error::msg)?.unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.scenarios_executed, 5);
    assert!(stored.collision_found);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_penalized_and_force_restarts() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::Hang);
    let restarts = executor.restarts.clone();
    let state = h
        .orchestrator
        .run(
            request(SearchConfig::new(SearchMethod::Random), 3),
            &mut executor,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.history.len(), 3);
    assert_eq!(state.scenarios_executed, 3);
    for record in &state.history {
        assert!(!record.outcome.valid);
        assert_eq!(record.reward, PENALTY_REWARD);
        assert!(record.outcome.failure.as_deref().unwrap().contains("timed out"));
    }
    assert!(!state.collision_found);
    // Initial start plus one restart after each of the first two timeouts.
    assert_eq!(restarts.load(Ordering::SeqCst), 3);

    let history = h.store.history(state.run_id).map_err(anyhow::Error::msg)?;
    assert_eq!(history.len(), 3);
    Ok(())
}

#[tokio::test]
async fn cancellation_mid_generation_keeps_completed_records() -> Result<()> {
    let h = harness()?;
    let mut search = SearchConfig::new(SearchMethod::Ga);
    search.ga = GaParams {
        population_size: 30,
        ..GaParams::default()
    };

    // Generation 1 evaluates 30, generation 2 evaluates 29 (one elite carried over),
    // then the run is stopped 12 evaluations into generation 3.
    let cancel = CancellationToken::new();
    let mut executor = StubExecutor::new(Behavior::TtcFromVector);
    executor.cancel_after = Some((30 + 29 + 12, cancel.clone()));

    let state = h
        .orchestrator
        .run(request(search, 5), &mut executor, &cancel)
        .await?;

    assert_eq!(state.status, RunStatus::Stopped);
    assert_eq!(state.history.len(), 71);
    assert_eq!(state.scenarios_executed, 71);
    assert_eq!(state.current_iteration, 3);
    assert!(state.best_solution.is_some());

    let stored = h.store.get_run(state.run_id).map_err(anyhow::Error::msg)?.unwrap();
    assert_eq!(stored.status, RunStatus::Stopped);
    assert_eq!(
        h.store.history(state.run_id).map_err(anyhow::Error::msg)?.len(),
        71
    );
    Ok(())
}

#[tokio::test]
async fn consecutive_crashes_fail_the_run() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::Crash);
    let restarts = executor.restarts.clone();
    let mut req = request(SearchConfig::new(SearchMethod::Random), 10);
    req.max_consecutive_failures = 2;

    let state = h
        .orchestrator
        .run(req, &mut executor, &CancellationToken::new())
        .await?;

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.history.len(), 3);
    assert!(state.failure_reason.as_deref().unwrap().contains("simulator crashed"));
    // Each crash leaves the executor `Crashed`, so every evaluation is preceded by a restart.
    assert_eq!(restarts.load(Ordering::SeqCst), 3);

    let stored = h.store.get_run(state.run_id).map_err(anyhow::Error::msg)?.unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.failure_reason.is_some());
    Ok(())
}

#[tokio::test]
async fn crash_forces_restart_even_when_health_looks_ready() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::CrashStaysReady);
    let restarts = executor.restarts.clone();

    let state = h
        .orchestrator
        .run(
            request(SearchConfig::new(SearchMethod::Random), 3),
            &mut executor,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.scenarios_executed, 3);
    for record in &state.history {
        assert_eq!(record.reward, PENALTY_REWARD);
        assert!(record.outcome.failure.as_deref().unwrap().contains("simulator crashed"));
    }
    // Initial start plus one restart after each of the first two crashes.
    assert_eq!(restarts.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn best_so_far_never_regresses() -> Result<()> {
    let h = harness()?;
    let mut search = SearchConfig::new(SearchMethod::Pso);
    search.pso = PsoParams {
        population_size: 4,
        ..PsoParams::default()
    };
    let mut req = request(search, 3);
    req.reward = RewardFunction::Ttc;

    let mut executor = StubExecutor::new(Behavior::TtcFromVector);
    let state = h
        .orchestrator
        .run(req, &mut executor, &CancellationToken::new())
        .await?;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.history.len(), 12);

    let events = h.progress.events.lock().unwrap();
    // One event per evaluation plus the final snapshot.
    assert_eq!(events.len(), 13);
    let mut previous = f64::INFINITY;
    for event in events.iter() {
        let best = event.best_reward.unwrap();
        assert!(best <= previous);
        previous = best;
    }
    assert_eq!(events.last().unwrap().status, RunStatus::Completed);

    let minimum = state
        .history
        .iter()
        .map(|r| r.reward)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(state.best_reward(), Some(minimum));
    let first_minimum = state
        .history
        .iter()
        .find(|r| r.reward == minimum)
        .unwrap();
    assert_eq!(
        state.best_solution.as_ref().unwrap().scenario_number,
        first_minimum.scenario_number
    );
    Ok(())
}

#[tokio::test]
async fn periodic_restart_follows_restart_gap() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::TtcFromVector);
    let restarts = executor.restarts.clone();
    let mut req = request(SearchConfig::new(SearchMethod::Random), 7);
    req.restart_gap = 3;

    let state = h
        .orchestrator
        .run(req, &mut executor, &CancellationToken::new())
        .await?;

    assert_eq!(state.status, RunStatus::Completed);
    // Started before evaluation 1, restarted before evaluations 4 and 7.
    assert_eq!(restarts.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn stop_on_collision_ends_the_run_early() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::Collide);
    let mut req = request(SearchConfig::new(SearchMethod::Random), 10);
    req.stop_on_collision = true;

    let state = h
        .orchestrator
        .run(req, &mut executor, &CancellationToken::new())
        .await?;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.history.len(), 1);
    assert!(state.collision_found);
    Ok(())
}

#[tokio::test]
async fn setup_errors_surface_before_the_simulator_starts() -> Result<()> {
    let h = harness()?;
    let mut executor = StubExecutor::new(Behavior::Collide);
    let restarts = executor.restarts.clone();

    let mut req = request(SearchConfig::new(SearchMethod::Random), 3);
    req.scenario = ScenarioDescription::new(
        r#"<routes><route id="1"><scenarios><scenario name="A" type="B"><v value="1"/></scenario></scenarios></route></routes>"#,
        None,
    );
    let err = h
        .orchestrator
        .run(req, &mut executor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FuzzError::Discovery(_)));

    let mut req = request(SearchConfig::new(SearchMethod::Random), 3);
    req.user_overrides.insert("absolute_v".to_string(), (10.0, 10.0));
    let err = h
        .orchestrator
        .run(req, &mut executor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FuzzError::RangeResolution(_)));

    let err = h
        .orchestrator
        .run(
            request(SearchConfig::new(SearchMethod::Random), 0),
            &mut executor,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FuzzError::Search(_)));

    assert_eq!(restarts.load(Ordering::SeqCst), 0);
    assert!(h.store.list_runs(10).map_err(anyhow::Error::msg)?.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manager_rejects_runs_beyond_capacity() -> Result<()> {
    let h = harness()?;
    let manager = RunManager::new(h.orchestrator.clone(), 1);

    let first = manager.start(
        request(SearchConfig::new(SearchMethod::Random), 50),
        Box::new(StubExecutor::new(Behavior::Hang)),
    )?;
    assert_eq!(manager.available_slots(), 0);
    assert_eq!(manager.active_runs()?, vec![first]);

    let rejected = manager.start(
        request(SearchConfig::new(SearchMethod::Random), 5),
        Box::new(StubExecutor::new(Behavior::Collide)),
    );
    assert!(matches!(rejected, Err(FuzzError::AtCapacity { limit: 1 })));

    manager.stop(first)?;
    let state = manager.wait(first).await?;
    assert_eq!(state.status, RunStatus::Stopped);
    assert!(state.history.len() <= 1);
    assert_eq!(manager.available_slots(), 1);

    let second = manager.start(
        request(SearchConfig::new(SearchMethod::Random), 2),
        Box::new(StubExecutor::new(Behavior::Collide)),
    )?;
    let state = manager.wait(second).await?;
    assert_eq!(state.status, RunStatus::Completed);
    assert!(matches!(
        manager.stop(second),
        Err(FuzzError::UnknownRun(id)) if id == second
    ));
    Ok(())
}

#[tokio::test]
async fn finished_runs_leave_the_registry_without_wait() -> Result<()> {
    let h = harness()?;
    let manager = RunManager::new(h.orchestrator.clone(), 2);

    let run_id = manager.start(
        request(SearchConfig::new(SearchMethod::Random), 2),
        Box::new(StubExecutor::new(Behavior::Collide)),
    )?;

    tokio::time::timeout(Duration::from_secs(10), async {
        while !manager.active_runs()?.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, FuzzError>(())
    })
    .await??;

    assert!(matches!(
        manager.stop(run_id),
        Err(FuzzError::UnknownRun(id)) if id == run_id
    ));
    assert!(matches!(
        manager.wait(run_id).await,
        Err(FuzzError::UnknownRun(_))
    ));

    let stored = h.store.get_run(run_id).map_err(anyhow::Error::msg)?.unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.scenarios_executed, 2);
    Ok(())
}
