use rand_chacha::ChaCha8Rng;

use super::{check_absorb, Bounds, SearchMethod, SearchPhase, SearchStrategy};
use crate::error::SearchError;
use crate::model::CandidateVector;

/// Independent uniform sampling. One iteration is one evaluation.
pub struct RandomSearch {
    bounds: Bounds,
    rng: ChaCha8Rng,
    budget: usize,
    evaluated: usize,
    phase: SearchPhase,
    pending: Option<CandidateVector>,
}

impl RandomSearch {
    pub fn new(bounds: Bounds, budget: usize, rng: ChaCha8Rng) -> Self {
        Self {
            bounds,
            rng,
            budget,
            evaluated: 0,
            phase: SearchPhase::Initialized,
            pending: None,
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::Random
    }

    fn phase(&self) -> SearchPhase {
        self.phase
    }

    fn propose_next(&mut self) -> Option<CandidateVector> {
        if self.phase.is_terminal() {
            return None;
        }
        if let Some(pending) = &self.pending {
            return Some(pending.clone());
        }
        if self.evaluated >= self.budget {
            self.phase = SearchPhase::Converged;
            return None;
        }
        let vector = self.bounds.sample(&mut self.rng);
        self.pending = Some(vector.clone());
        self.phase = SearchPhase::AwaitingEvaluation;
        Some(vector)
    }

    fn absorb(&mut self, vector: &[f64], _reward: f64) -> Result<(), SearchError> {
        check_absorb(self.phase, self.bounds.dimensions(), vector)?;
        self.pending = None;
        self.evaluated += 1;
        self.phase = if self.evaluated >= self.budget {
            SearchPhase::Converged
        } else {
            SearchPhase::Proposing
        };
        Ok(())
    }

    fn abort(&mut self) {
        self.pending = None;
        self.phase = SearchPhase::Aborted;
    }

    fn iteration(&self) -> usize {
        if self.pending.is_some() {
            self.evaluated + 1
        } else {
            self.evaluated.max(1)
        }
    }

    fn population_size(&self) -> usize {
        1
    }

    fn total_evaluations(&self) -> usize {
        self.budget
    }

    fn population(&self) -> Vec<CandidateVector> {
        Vec::new()
    }
}
