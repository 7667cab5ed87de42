pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod orchestrator;
pub mod progress;
pub mod state;
pub mod store;
pub mod util;

pub use cancel::CancellationToken;
pub use config::EngineSettings;
pub use error::FuzzError;
pub use executor::{
    EvaluationFailure, EvaluationRequest, ExecutorState, ProcessConfig, ProcessExecutor,
    ScenarioExecutor,
};
pub use manager::RunManager;
pub use orchestrator::{Orchestrator, PreparedRun, RunRequest};
pub use progress::{BroadcastProgress, LogProgress, ProgressEvent, ProgressSink};
pub use state::{BestSolution, RunStatus, SearchRecord, SearchRunState};
pub use store::{ResultSink, ResultStore, StoredRun};
