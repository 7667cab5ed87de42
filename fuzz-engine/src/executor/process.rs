use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use scenario_fuzz_core::{apply_vector, ActorState, Outcome, ScenarioDescription};
use serde::Deserialize;
use tokio::process::{Child, Command};

use super::{EvaluationFailure, EvaluationRequest, ExecutorState, ScenarioExecutor};

/// Exit code used by `timeout(1)` and the scenario scripts to report an overrun.
const TIMEOUT_EXIT_CODE: i32 = 124;
const RESULT_FILE_NAME: &str = "epoch_result.json";
const SCENARIO_FILE_NAME: &str = "scenario.xml";

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub scenario: ScenarioDescription,
    /// Long-lived simulator, started on `restart` and killed on `shutdown`.
    pub simulator_command: Option<String>,
    /// Run once per evaluation with `SCENARIO_FILE`, `RESULT_FILE` and
    /// `CURRENT_RUN_NUMBER` set.
    pub scenario_command: String,
    pub work_dir: PathBuf,
    pub startup_grace: Duration,
}

pub struct ProcessExecutor {
    config: ProcessConfig,
    state: ExecutorState,
    simulator: Option<Child>,
}

impl ProcessExecutor {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            state: ExecutorState::Stopped,
            simulator: None,
        }
    }

    fn shell(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn prepare_run_dir(&self, run_number: u64) -> Result<PathBuf, EvaluationFailure> {
        let dir = self.config.work_dir.join(format!("run_{run_number:05}"));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EvaluationFailure::Io {
                reason: format!("failed to create {}: {e}", dir.display()),
            })?;
        let stale = dir.join(RESULT_FILE_NAME);
        if tokio::fs::try_exists(&stale).await.unwrap_or(false) {
            tokio::fs::remove_file(&stale)
                .await
                .map_err(|e| EvaluationFailure::Io {
                    reason: format!("failed to remove stale {}: {e}", stale.display()),
                })?;
        }
        Ok(dir)
    }

    async fn run_scenario(
        &mut self,
        request: &EvaluationRequest<'_>,
    ) -> Result<Outcome, EvaluationFailure> {
        let xml = apply_vector(&self.config.scenario, request.vector).map_err(|e| {
            EvaluationFailure::Scenario {
                reason: e.to_string(),
            }
        })?;

        let dir = self.prepare_run_dir(request.run_number).await?;
        let scenario_file = dir.join(SCENARIO_FILE_NAME);
        let result_file = dir.join(RESULT_FILE_NAME);
        tokio::fs::write(&scenario_file, xml)
            .await
            .map_err(|e| EvaluationFailure::Io {
                reason: format!("failed to write {}: {e}", scenario_file.display()),
            })?;

        let mut child = Self::shell(&self.config.scenario_command)
            .current_dir(&dir)
            .env("SCENARIO_FILE", &scenario_file)
            .env("RESULT_FILE", &result_file)
            .env("CURRENT_RUN_NUMBER", request.run_number.to_string())
            .spawn()
            .map_err(|e| EvaluationFailure::Launch {
                reason: format!("scenario command: {e}"),
            })?;

        let status = match tokio::time::timeout(request.timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| EvaluationFailure::Io {
                reason: format!("failed waiting for scenario command: {e}"),
            })?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(run_number = request.run_number, "failed to kill scenario command: {e}");
                }
                return Err(EvaluationFailure::Timeout {
                    after: request.timeout,
                });
            }
        };

        if status.code() == Some(TIMEOUT_EXIT_CODE) {
            return Err(EvaluationFailure::Timeout {
                after: request.timeout,
            });
        }
        if !status.success() {
            return Err(EvaluationFailure::Crashed {
                reason: format!("scenario command exited with {status}"),
            });
        }

        let bytes = read_result(&result_file).await?;
        parse_epoch_result(&bytes, request.run_number)
    }
}

async fn read_result(path: &Path) -> Result<Vec<u8>, EvaluationFailure> {
    tokio::fs::read(path)
        .await
        .map_err(|e| EvaluationFailure::MalformedOutcome {
            reason: format!("missing result file {}: {e}", path.display()),
        })
}

#[derive(Debug, Deserialize)]
struct EpochResult {
    collision_flag: Option<bool>,
    #[serde(default)]
    min_ttc: Option<f64>,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    collision_status: Option<CollisionStatus>,
}

#[derive(Debug, Deserialize)]
struct CollisionStatus {
    #[serde(rename = "EGO", default)]
    ego: Option<Vec<f64>>,
    #[serde(rename = "NPC", default)]
    npc: Option<Vec<f64>>,
}

fn actor(values: Option<Vec<f64>>) -> Option<ActorState> {
    match values?.as_slice() {
        [x, y, velocity, yaw, ..] => Some(ActorState {
            x: *x,
            y: *y,
            velocity: *velocity,
            yaw: *yaw,
        }),
        _ => None,
    }
}

/// Decode the simulator's `epoch_result.json`.
pub fn parse_epoch_result(bytes: &[u8], run_number: u64) -> Result<Outcome, EvaluationFailure> {
    let raw: EpochResult =
        serde_json::from_slice(bytes).map_err(|e| EvaluationFailure::MalformedOutcome {
            reason: e.to_string(),
        })?;
    let collision_occurred = raw
        .collision_flag
        .ok_or_else(|| EvaluationFailure::MalformedOutcome {
            reason: "collision_flag missing".to_string(),
        })?;
    let (ego, npc) = match raw.collision_status {
        Some(status) => (actor(status.ego), actor(status.npc)),
        None => (None, None),
    };

    Ok(Outcome {
        collision_occurred,
        min_time_to_collision: raw.min_ttc,
        min_distance: raw.distance,
        ego,
        npc,
        run_number,
        valid: true,
        failure: None,
    })
}

#[async_trait]
impl ScenarioExecutor for ProcessExecutor {
    fn state(&self) -> ExecutorState {
        self.state
    }

    fn poll_health(&mut self) -> ExecutorState {
        if let Some(simulator) = self.simulator.as_mut() {
            match simulator.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!(%status, "simulator exited unexpectedly");
                    self.simulator = None;
                    self.state = ExecutorState::Crashed;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("failed to poll simulator: {e}");
                    self.state = ExecutorState::Crashed;
                }
            }
        }
        self.state
    }

    async fn evaluate(
        &mut self,
        request: &EvaluationRequest<'_>,
    ) -> Result<Outcome, EvaluationFailure> {
        let state = self.poll_health();
        if state != ExecutorState::Ready {
            return Err(EvaluationFailure::NotReady { state });
        }

        self.state = ExecutorState::Evaluating;
        let result = self.run_scenario(request).await;

        self.state = match &result {
            Ok(_) => ExecutorState::Ready,
            Err(EvaluationFailure::Scenario { .. }) | Err(EvaluationFailure::MalformedOutcome { .. }) => {
                ExecutorState::Ready
            }
            Err(_) => ExecutorState::Crashed,
        };
        if self.state == ExecutorState::Ready {
            self.poll_health();
        }
        result
    }

    async fn restart(&mut self) -> Result<(), EvaluationFailure> {
        self.shutdown().await;
        self.state = ExecutorState::Starting;

        let Some(command) = self.config.simulator_command.clone() else {
            self.state = ExecutorState::Ready;
            return Ok(());
        };

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| EvaluationFailure::Io {
                reason: format!("failed to create {}: {e}", self.config.work_dir.display()),
            })?;

        tracing::info!(command = %command, "starting simulator");
        let spawned = Self::shell(&command)
            .current_dir(&self.config.work_dir)
            .spawn();
        match spawned {
            Ok(child) => self.simulator = Some(child),
            Err(e) => {
                self.state = ExecutorState::Crashed;
                return Err(EvaluationFailure::Launch {
                    reason: e.to_string(),
                });
            }
        }

        tokio::time::sleep(self.config.startup_grace).await;
        self.state = ExecutorState::Ready;
        if self.poll_health() != ExecutorState::Ready {
            return Err(EvaluationFailure::Launch {
                reason: "simulator exited during startup".to_string(),
            });
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(mut simulator) = self.simulator.take() {
            if let Err(e) = simulator.kill().await {
                tracing::warn!("failed to stop simulator: {e}");
            }
        }
        self.state = ExecutorState::Stopped;
    }
}
