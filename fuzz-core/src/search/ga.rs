use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{check_absorb, sanitize_reward, Bounds, SearchMethod, SearchPhase, SearchStrategy};
use crate::error::SearchError;
use crate::model::CandidateVector;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaParams {
    pub population_size: usize,
    pub prob_mut: f64,
    pub prob_cross: f64,
    /// Best individuals copied unchanged (and not re-evaluated) into the next generation.
    pub elite_count: usize,
    pub tournament_size: usize,
    /// Maximum mutation step as a fraction of the dimension's range.
    pub mutation_scale: f64,
}

impl Default for GaParams {
    fn default() -> Self {
        Self {
            population_size: 50,
            prob_mut: 0.1,
            prob_cross: 0.9,
            elite_count: 1,
            tournament_size: 3,
            mutation_scale: 0.1,
        }
    }
}

impl GaParams {
    fn validate(&self) -> Result<(), SearchError> {
        let invalid = |name: &'static str, reason: String| SearchError::InvalidParameter { name, reason };

        if self.population_size < 2 {
            return Err(invalid("ga.population_size", "must be at least 2".to_string()));
        }
        if self.elite_count >= self.population_size {
            return Err(invalid(
                "ga.elite_count",
                format!("must be below population_size ({})", self.population_size),
            ));
        }
        if self.tournament_size == 0 {
            return Err(invalid("ga.tournament_size", "must be at least 1".to_string()));
        }
        for (name, p) in [("ga.prob_mut", self.prob_mut), ("ga.prob_cross", self.prob_cross)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(name, format!("must be within [0, 1], got {p}")));
            }
        }
        if !(self.mutation_scale.is_finite() && self.mutation_scale > 0.0) {
            return Err(invalid(
                "ga.mutation_scale",
                format!("must be a positive number, got {}", self.mutation_scale),
            ));
        }
        Ok(())
    }

    pub fn evaluations_for(&self, generations: usize) -> usize {
        if generations == 0 {
            return 0;
        }
        self.population_size + (generations - 1) * (self.population_size - self.elite_count)
    }
}

#[derive(Clone)]
struct Individual {
    genes: CandidateVector,
    reward: f64,
}

/// Real-valued genetic algorithm minimising reward. One iteration is one generation:
/// the full population for generation 1, then `population_size - elite_count` offspring.
pub struct GeneticSearch {
    params: GaParams,
    bounds: Bounds,
    rng: ChaCha8Rng,
    /// Scored members of the last completed generation, best first.
    ranked: Vec<Individual>,
    /// Candidates of the generation being evaluated.
    brood: Vec<CandidateVector>,
    brood_scores: Vec<f64>,
    budget: usize,
    completed_generations: usize,
    phase: SearchPhase,
}

impl GeneticSearch {
    pub fn new(
        params: GaParams,
        bounds: Bounds,
        budget: usize,
        mut rng: ChaCha8Rng,
    ) -> Result<Self, SearchError> {
        params.validate()?;
        let brood = (0..params.population_size)
            .map(|_| bounds.sample(&mut rng))
            .collect();
        Ok(Self {
            params,
            bounds,
            rng,
            ranked: Vec::new(),
            brood,
            brood_scores: Vec::new(),
            budget,
            completed_generations: 0,
            phase: SearchPhase::Initialized,
        })
    }

    fn close_generation(&mut self) {
        let mut members: Vec<Individual> = self
            .ranked
            .iter()
            .take(if self.completed_generations == 0 { 0 } else { self.params.elite_count })
            .cloned()
            .collect();
        members.extend(
            self.brood
                .drain(..)
                .zip(self.brood_scores.drain(..))
                .map(|(genes, reward)| Individual { genes, reward }),
        );
        // Stable: equal rewards keep their earlier position.
        members.sort_by(|a, b| a.reward.total_cmp(&b.reward));
        self.ranked = members;
        self.completed_generations += 1;
    }

    fn breed(&mut self) {
        let offspring = self.params.population_size - self.params.elite_count;
        let mut brood = Vec::with_capacity(offspring);
        for _ in 0..offspring {
            let a = self.tournament();
            let b = self.tournament();
            let mut child = self.crossover(a, b);
            self.mutate(&mut child);
            self.bounds.clip_vector(&mut child);
            brood.push(child);
        }
        self.brood = brood;
    }

    /// Index into `ranked` of the tournament winner. `ranked` is sorted best first, so
    /// the smallest sampled index wins.
    fn tournament(&mut self) -> usize {
        let size = self.ranked.len();
        (0..self.params.tournament_size)
            .map(|_| self.rng.gen_range(0..size))
            .min()
            .unwrap_or(0)
    }

    fn crossover(&mut self, a: usize, b: usize) -> CandidateVector {
        let first = &self.ranked[a].genes;
        let second = &self.ranked[b].genes;
        if self.rng.gen::<f64>() >= self.params.prob_cross {
            return first.clone();
        }
        first
            .iter()
            .zip(second)
            .map(|(x, y)| {
                let alpha: f64 = self.rng.gen();
                alpha * x + (1.0 - alpha) * y
            })
            .collect()
    }

    fn mutate(&mut self, genes: &mut [f64]) {
        for (d, gene) in genes.iter_mut().enumerate() {
            if self.rng.gen::<f64>() < self.params.prob_mut {
                let step = self.params.mutation_scale * self.bounds.span(d);
                *gene += self.rng.gen_range(-step..=step);
            }
        }
    }
}

impl SearchStrategy for GeneticSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::Ga
    }

    fn phase(&self) -> SearchPhase {
        self.phase
    }

    fn propose_next(&mut self) -> Option<CandidateVector> {
        match self.phase {
            SearchPhase::Converged | SearchPhase::Aborted => None,
            _ if self.completed_generations >= self.budget => {
                self.phase = SearchPhase::Converged;
                None
            }
            _ => {
                self.phase = SearchPhase::AwaitingEvaluation;
                Some(self.brood[self.brood_scores.len()].clone())
            }
        }
    }

    fn absorb(&mut self, vector: &[f64], reward: f64) -> Result<(), SearchError> {
        check_absorb(self.phase, self.bounds.dimensions(), vector)?;
        self.phase = SearchPhase::Updating;
        self.brood_scores.push(sanitize_reward(reward));

        if self.brood_scores.len() == self.brood.len() {
            self.close_generation();
            if self.completed_generations >= self.budget {
                self.phase = SearchPhase::Converged;
                return Ok(());
            }
            self.breed();
        }
        self.phase = SearchPhase::Proposing;
        Ok(())
    }

    fn abort(&mut self) {
        self.phase = SearchPhase::Aborted;
    }

    fn iteration(&self) -> usize {
        if self.phase == SearchPhase::Converged {
            self.completed_generations
        } else {
            self.completed_generations + 1
        }
    }

    fn population_size(&self) -> usize {
        self.params.population_size
    }

    fn total_evaluations(&self) -> usize {
        self.params.evaluations_for(self.budget)
    }

    fn population(&self) -> Vec<CandidateVector> {
        if self.ranked.is_empty() {
            self.brood.clone()
        } else {
            self.ranked.iter().map(|i| i.genes.clone()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::rng_from_seed;

    fn ga(population_size: usize, elite_count: usize, budget: usize) -> GeneticSearch {
        let params = GaParams {
            population_size,
            elite_count,
            prob_mut: 0.5,
            ..GaParams::default()
        };
        let bounds = Bounds::new(&[(0.0, 1.0), (100.0, 200.0)]).unwrap();
        GeneticSearch::new(params, bounds, budget, rng_from_seed(3)).unwrap()
    }

    #[test]
    fn elites_are_not_re_evaluated() {
        let mut search = ga(6, 2, 3);
        assert_eq!(search.total_evaluations(), 6 + 4 + 4);

        let mut evaluations = 0;
        while let Some(v) = search.propose_next() {
            search.absorb(&v, v[0]).unwrap();
            evaluations += 1;
        }
        assert_eq!(evaluations, 14);
        assert_eq!(search.phase(), SearchPhase::Converged);
        assert_eq!(search.iteration(), 3);
    }

    #[test]
    fn ranking_prefers_lower_reward_and_earlier_on_tie() {
        let mut search = ga(4, 1, 2);
        let rewards = [3.0, 1.0, 1.0, 2.0];
        let mut proposed = Vec::new();
        for reward in rewards {
            let v = search.propose_next().unwrap();
            proposed.push(v.clone());
            search.absorb(&v, reward).unwrap();
        }
        let population = search.population();
        assert_eq!(population[0], proposed[1]);
        assert_eq!(population[1], proposed[2]);
        assert_eq!(population[3], proposed[0]);
    }

    #[test]
    fn elite_count_must_leave_room_for_offspring() {
        let bounds = Bounds::new(&[(0.0, 1.0)]).unwrap();
        let params = GaParams {
            population_size: 3,
            elite_count: 3,
            ..GaParams::default()
        };
        assert!(GeneticSearch::new(params, bounds, 1, rng_from_seed(0)).is_err());
    }
}
