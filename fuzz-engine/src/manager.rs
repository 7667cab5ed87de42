use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{sync::Semaphore, task::JoinHandle};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::FuzzError;
use crate::executor::ScenarioExecutor;
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::state::SearchRunState;

struct ActiveRun {
    cancel: CancellationToken,
    handle: JoinHandle<SearchRunState>,
}

/// Runs searches as background tasks, at most `max_concurrent_runs` at a time.
///
/// A start request beyond the limit is rejected with [`FuzzError::AtCapacity`] rather
/// than queued.
pub struct RunManager {
    orchestrator: Arc<Orchestrator>,
    slots: Arc<Semaphore>,
    limit: usize,
    runs: Mutex<HashMap<Uuid, ActiveRun>>,
}

impl RunManager {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent_runs: usize) -> Self {
        let limit = max_concurrent_runs.max(1);
        Self {
            orchestrator,
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Prepare the run and spawn it. Setup errors are returned here; the slot is
    /// released when the run reaches a terminal state.
    pub fn start(
        &self,
        request: RunRequest,
        executor: Box<dyn ScenarioExecutor>,
    ) -> Result<Uuid, FuzzError> {
        let permit = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| FuzzError::AtCapacity { limit: self.limit })?;

        let prepared = self.orchestrator.prepare(request)?;
        let run_id = prepared.run_id;
        let cancel = CancellationToken::new();

        let orchestrator = self.orchestrator.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let mut executor = executor;
            orchestrator
                .execute(prepared, executor.as_mut(), &token)
                .await
        });

        let mut runs = self.lock()?;
        prune_finished(&mut runs);
        runs.insert(run_id, ActiveRun { cancel, handle });
        drop(runs);
        tracing::info!(run_id = %run_id, "run scheduled");
        Ok(run_id)
    }

    /// Request cancellation. The run stops after its in-flight evaluation.
    pub fn stop(&self, run_id: Uuid) -> Result<(), FuzzError> {
        let runs = self.lock()?;
        let run = runs.get(&run_id).ok_or(FuzzError::UnknownRun(run_id))?;
        run.cancel.cancel();
        tracing::info!(run_id = %run_id, "stop requested");
        Ok(())
    }

    /// Ids of runs that have not yet reached a terminal state. Finished runs nobody
    /// waited on are dropped from the registry; their results stay in the store.
    pub fn active_runs(&self) -> Result<Vec<Uuid>, FuzzError> {
        let mut runs = self.lock()?;
        prune_finished(&mut runs);
        Ok(runs.keys().copied().collect())
    }

    /// Wait for a run to finish and take its final state. Only runs still registered
    /// can be waited on.
    pub async fn wait(&self, run_id: Uuid) -> Result<SearchRunState, FuzzError> {
        let run = self
            .lock()?
            .remove(&run_id)
            .ok_or(FuzzError::UnknownRun(run_id))?;
        run.handle
            .await
            .map_err(|e| FuzzError::Internal(format!("run task {run_id} failed: {e}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, ActiveRun>>, FuzzError> {
        self.runs
            .lock()
            .map_err(|_| FuzzError::Internal("run registry lock poisoned".to_string()))
    }
}

fn prune_finished(runs: &mut HashMap<Uuid, ActiveRun>) {
    runs.retain(|run_id, run| {
        let finished = run.handle.is_finished();
        if finished {
            tracing::debug!(run_id = %run_id, "dropping finished run from registry");
        }
        !finished
    });
}
