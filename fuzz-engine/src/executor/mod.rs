mod process;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use scenario_fuzz_core::{Outcome, ParameterSpec};
use serde::Serialize;

pub use process::{parse_epoch_result, ProcessConfig, ProcessExecutor};

/// Simulator lifecycle: `Stopped -> Starting -> Ready -> Evaluating -> (Ready | Crashed)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Stopped,
    Starting,
    Ready,
    Evaluating,
    Crashed,
}

impl ExecutorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Evaluating => "evaluating",
            Self::Crashed => "crashed",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EvaluationFailure {
    Timeout { after: Duration },
    Crashed { reason: String },
    Launch { reason: String },
    Scenario { reason: String },
    MalformedOutcome { reason: String },
    Io { reason: String },
    NotReady { state: ExecutorState },
}

impl EvaluationFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Failures after which the simulator cannot be trusted for the next evaluation.
    pub fn needs_restart(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Crashed { .. } | Self::Launch { .. }
        )
    }
}

impl fmt::Display for EvaluationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after } => {
                write!(f, "evaluation timed out after {:.1}s", after.as_secs_f64())
            }
            Self::Crashed { reason } => write!(f, "simulator crashed: {reason}"),
            Self::Launch { reason } => write!(f, "failed to launch simulator: {reason}"),
            Self::Scenario { reason } => write!(f, "failed to prepare scenario: {reason}"),
            Self::MalformedOutcome { reason } => write!(f, "malformed outcome: {reason}"),
            Self::Io { reason } => write!(f, "executor i/o error: {reason}"),
            Self::NotReady { state } => {
                write!(f, "executor not ready (state: {})", state.as_str())
            }
        }
    }
}

impl std::error::Error for EvaluationFailure {}

pub struct EvaluationRequest<'a> {
    pub run_number: u64,
    pub parameters: &'a [ParameterSpec],
    pub vector: &'a [f64],
    pub timeout: Duration,
}

/// Black-box scenario execution. Each run owns its own executor instance.
///
/// Implementations should honour `request.timeout` themselves; the orchestrator also
/// enforces it and treats an overrun as a crash.
#[async_trait]
pub trait ScenarioExecutor: Send {
    fn state(&self) -> ExecutorState;

    /// Refresh `state()` from the underlying process, detecting crashes between runs.
    fn poll_health(&mut self) -> ExecutorState {
        self.state()
    }

    async fn evaluate(
        &mut self,
        request: &EvaluationRequest<'_>,
    ) -> Result<Outcome, EvaluationFailure>;

    /// Bring the simulator to `Ready`, stopping any existing instance first.
    async fn restart(&mut self) -> Result<(), EvaluationFailure>;

    async fn shutdown(&mut self);
}
