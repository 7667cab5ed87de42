use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{check_absorb, sanitize_reward, Bounds, SearchMethod, SearchPhase, SearchStrategy};
use crate::error::SearchError;
use crate::model::CandidateVector;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PsoParams {
    pub population_size: usize,
    /// Inertia weight.
    pub w: f64,
    /// Cognitive (personal best) coefficient.
    pub c1: f64,
    /// Social (global best) coefficient.
    pub c2: f64,
}

impl Default for PsoParams {
    fn default() -> Self {
        Self {
            population_size: 20,
            w: 0.8,
            c1: 0.5,
            c2: 0.5,
        }
    }
}

impl PsoParams {
    fn validate(&self) -> Result<(), SearchError> {
        if self.population_size == 0 {
            return Err(SearchError::InvalidParameter {
                name: "pso.population_size",
                reason: "must be at least 1".to_string(),
            });
        }
        for (name, value) in [("pso.w", self.w), ("pso.c1", self.c1), ("pso.c2", self.c2)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SearchError::InvalidParameter {
                    name,
                    reason: format!("must be a finite non-negative number, got {value}"),
                });
            }
        }
        Ok(())
    }
}

struct Particle {
    position: CandidateVector,
    velocity: Vec<f64>,
    best_position: CandidateVector,
    best_reward: f64,
}

/// Particle swarm optimisation. One iteration is a full sweep over the swarm; velocities
/// and positions move only after every particle of the sweep has been scored.
pub struct ParticleSwarm {
    params: PsoParams,
    bounds: Bounds,
    rng: ChaCha8Rng,
    particles: Vec<Particle>,
    global_best: Option<(CandidateVector, f64)>,
    budget: usize,
    completed_sweeps: usize,
    cursor: usize,
    phase: SearchPhase,
}

impl ParticleSwarm {
    pub fn new(
        params: PsoParams,
        bounds: Bounds,
        budget: usize,
        mut rng: ChaCha8Rng,
    ) -> Result<Self, SearchError> {
        params.validate()?;

        let particles = (0..params.population_size)
            .map(|_| {
                let position = bounds.sample(&mut rng);
                let velocity = (0..bounds.dimensions())
                    .map(|d| bounds.span(d) * rng.gen_range(-1.0_f64..=1.0))
                    .collect();
                Particle {
                    best_position: position.clone(),
                    position,
                    velocity,
                    best_reward: f64::INFINITY,
                }
            })
            .collect();

        Ok(Self {
            params,
            bounds,
            rng,
            particles,
            global_best: None,
            budget,
            completed_sweeps: 0,
            cursor: 0,
            phase: SearchPhase::Initialized,
        })
    }

    pub fn global_best(&self) -> Option<(&[f64], f64)> {
        self.global_best
            .as_ref()
            .map(|(position, reward)| (position.as_slice(), *reward))
    }

    fn advance_swarm(&mut self) {
        let Some((global_best, _)) = self.global_best.clone() else {
            return;
        };
        let PsoParams { w, c1, c2, .. } = self.params;

        for particle in &mut self.particles {
            for d in 0..self.bounds.dimensions() {
                let r1: f64 = self.rng.gen();
                let r2: f64 = self.rng.gen();
                let x = particle.position[d];
                let vmax = self.bounds.span(d);

                let v = w * particle.velocity[d]
                    + c1 * r1 * (particle.best_position[d] - x)
                    + c2 * r2 * (global_best[d] - x);
                let v = if v.is_finite() { v.clamp(-vmax, vmax) } else { 0.0 };

                particle.velocity[d] = v;
                particle.position[d] = self.bounds.clip(d, x + v);
            }
        }
    }
}

impl SearchStrategy for ParticleSwarm {
    fn method(&self) -> SearchMethod {
        SearchMethod::Pso
    }

    fn phase(&self) -> SearchPhase {
        self.phase
    }

    fn propose_next(&mut self) -> Option<CandidateVector> {
        match self.phase {
            SearchPhase::Converged | SearchPhase::Aborted => None,
            _ if self.completed_sweeps >= self.budget => {
                self.phase = SearchPhase::Converged;
                None
            }
            _ => {
                self.phase = SearchPhase::AwaitingEvaluation;
                Some(self.particles[self.cursor].position.clone())
            }
        }
    }

    fn absorb(&mut self, vector: &[f64], reward: f64) -> Result<(), SearchError> {
        check_absorb(self.phase, self.bounds.dimensions(), vector)?;
        self.phase = SearchPhase::Updating;

        let reward = sanitize_reward(reward);
        let particle = &mut self.particles[self.cursor];
        if reward < particle.best_reward {
            particle.best_reward = reward;
            particle.best_position = particle.position.clone();
        }
        let improves_global = match &self.global_best {
            Some((_, best)) => reward < *best,
            None => true,
        };
        if improves_global {
            self.global_best = Some((particle.position.clone(), reward));
        }

        self.cursor += 1;
        if self.cursor == self.particles.len() {
            self.cursor = 0;
            self.completed_sweeps += 1;
            if self.completed_sweeps >= self.budget {
                self.phase = SearchPhase::Converged;
                return Ok(());
            }
            self.advance_swarm();
        }
        self.phase = SearchPhase::Proposing;
        Ok(())
    }

    fn abort(&mut self) {
        self.phase = SearchPhase::Aborted;
    }

    fn iteration(&self) -> usize {
        if self.phase == SearchPhase::Converged {
            self.completed_sweeps
        } else {
            self.completed_sweeps + 1
        }
    }

    fn population_size(&self) -> usize {
        self.particles.len()
    }

    fn total_evaluations(&self) -> usize {
        self.budget * self.particles.len()
    }

    fn population(&self) -> Vec<CandidateVector> {
        self.particles.iter().map(|p| p.position.clone()).collect()
    }
}
