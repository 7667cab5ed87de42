use std::time::Duration;

use scenario_fuzz_core::SearchMethod;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::state::{RunStatus, SearchRunState};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub iteration: usize,
    pub total_iterations: usize,
    pub scenarios_executed: usize,
    pub total_scenarios: usize,
    pub best_reward: Option<f64>,
    pub collision_found: bool,
    pub recent_rewards: Vec<f64>,
    pub elapsed_time: f64,
    pub estimated_remaining: Option<f64>,
    pub search_method: SearchMethod,
    pub population_size: usize,
}

impl ProgressEvent {
    pub fn snapshot(state: &SearchRunState, elapsed: Duration, window: usize) -> Self {
        let elapsed_time = elapsed.as_secs_f64();
        let estimated_remaining = if state.status == RunStatus::Running {
            estimate_remaining(elapsed_time, state.scenarios_executed, state.total_scenarios)
        } else {
            Some(0.0)
        };
        Self {
            run_id: state.run_id,
            status: state.status,
            iteration: state.current_iteration,
            total_iterations: state.total_iterations,
            scenarios_executed: state.scenarios_executed,
            total_scenarios: state.total_scenarios,
            best_reward: state.best_reward(),
            collision_found: state.collision_found,
            recent_rewards: state.recent_rewards(window),
            elapsed_time,
            estimated_remaining,
            search_method: state.method,
            population_size: state.population_size,
        }
    }
}

pub fn estimate_remaining(elapsed_s: f64, executed: usize, total: usize) -> Option<f64> {
    if executed == 0 {
        return None;
    }
    let per_scenario = elapsed_s / executed as f64;
    Some(per_scenario * total.saturating_sub(executed) as f64)
}

/// Consumer of progress snapshots. `emit` must not block the run loop.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Fan-out to any number of subscribers. Slow subscribers lag and drop events; the
/// run never waits for them.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressSink for BroadcastProgress {
    fn emit(&self, event: &ProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
    }
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: &ProgressEvent) {
        tracing::info!(
            run_id = %event.run_id,
            status = event.status.as_str(),
            iteration = event.iteration,
            total_iterations = event.total_iterations,
            executed = event.scenarios_executed,
            total = event.total_scenarios,
            best_reward = ?event.best_reward,
            collision_found = event.collision_found,
            eta_s = ?event.estimated_remaining.map(|s| s.round()),
            "progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_scales_with_remaining_work() {
        assert_eq!(estimate_remaining(10.0, 0, 10), None);
        assert_eq!(estimate_remaining(10.0, 5, 10), Some(10.0));
        assert_eq!(estimate_remaining(10.0, 10, 10), Some(0.0));
    }

    #[test]
    fn broadcast_without_subscribers_does_not_fail() {
        let progress = BroadcastProgress::new(4);
        let event = ProgressEvent {
            run_id: Uuid::new_v4(),
            status: RunStatus::Running,
            iteration: 1,
            total_iterations: 2,
            scenarios_executed: 1,
            total_scenarios: 2,
            best_reward: Some(1.0),
            collision_found: false,
            recent_rewards: vec![1.0],
            elapsed_time: 0.5,
            estimated_remaining: Some(0.5),
            search_method: SearchMethod::Random,
            population_size: 1,
        };
        progress.emit(&event);

        let mut rx = progress.subscribe();
        progress.emit(&event);
        assert_eq!(rx.try_recv().unwrap(), event);
    }
}
