mod ga;
mod pso;
mod random;

use std::{fmt, str::FromStr};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::model::{CandidateVector, ParameterSpec};

pub use ga::{GaParams, GeneticSearch};
pub use pso::{ParticleSwarm, PsoParams};
pub use random::RandomSearch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Random,
    #[default]
    Pso,
    Ga,
}

impl SearchMethod {
    pub const ALL: [SearchMethod; 3] = [Self::Random, Self::Pso, Self::Ga];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Pso => "pso",
            Self::Ga => "ga",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMethod {
    type Err = SearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "pso" => Ok(Self::Pso),
            "ga" | "genetic" => Ok(Self::Ga),
            _ => Err(SearchError::UnknownMethod {
                found: value.to_string(),
            }),
        }
    }
}

/// Lifecycle shared by every strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Initialized,
    Proposing,
    AwaitingEvaluation,
    Updating,
    Converged,
    Aborted,
}

impl SearchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Aborted)
    }
}

/// Propose/absorb contract driven by the orchestrator. Strategies never evaluate
/// candidates themselves.
pub trait SearchStrategy: Send {
    fn method(&self) -> SearchMethod;
    fn phase(&self) -> SearchPhase;
    /// Next candidate, or `None` once converged or aborted. Calling this again before
    /// `absorb` returns the same pending candidate.
    fn propose_next(&mut self) -> Option<CandidateVector>;
    /// Feed back the reward for the pending candidate.
    fn absorb(&mut self, vector: &[f64], reward: f64) -> Result<(), SearchError>;
    fn abort(&mut self);
    /// 1-based index of the iteration the current (or last) proposal belongs to.
    fn iteration(&self) -> usize;
    fn population_size(&self) -> usize;
    /// Evaluations needed to exhaust the iteration budget.
    fn total_evaluations(&self) -> usize;
    /// Current positions (PSO) or individuals (GA). Empty for random search.
    fn population(&self) -> Vec<CandidateVector>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    pub fn new(ranges: &[(f64, f64)]) -> Result<Self, SearchError> {
        if ranges.is_empty() {
            return Err(SearchError::EmptyBounds);
        }
        for (dimension, &(lower, upper)) in ranges.iter().enumerate() {
            if !(lower.is_finite() && upper.is_finite() && lower < upper)
                || !(upper - lower).is_finite()
            {
                return Err(SearchError::InvalidBound {
                    dimension,
                    lower,
                    upper,
                });
            }
        }
        Ok(Self {
            lower: ranges.iter().map(|r| r.0).collect(),
            upper: ranges.iter().map(|r| r.1).collect(),
        })
    }

    pub fn from_specs(specs: &[ParameterSpec]) -> Result<Self, SearchError> {
        let ranges: Vec<(f64, f64)> = specs.iter().map(ParameterSpec::bounds).collect();
        Self::new(&ranges)
    }

    pub fn dimensions(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self, dimension: usize) -> f64 {
        self.lower[dimension]
    }

    pub fn upper(&self, dimension: usize) -> f64 {
        self.upper[dimension]
    }

    pub fn span(&self, dimension: usize) -> f64 {
        self.upper[dimension] - self.lower[dimension]
    }

    pub fn contains(&self, vector: &[f64]) -> bool {
        vector.len() == self.dimensions()
            && vector
                .iter()
                .enumerate()
                .all(|(d, v)| *v >= self.lower[d] && *v <= self.upper[d])
    }

    pub fn clip(&self, dimension: usize, value: f64) -> f64 {
        if value.is_nan() {
            return self.lower[dimension];
        }
        value.clamp(self.lower[dimension], self.upper[dimension])
    }

    pub fn clip_vector(&self, vector: &mut [f64]) {
        for (d, v) in vector.iter_mut().enumerate() {
            *v = self.clip(d, *v);
        }
    }

    pub fn sample(&self, rng: &mut ChaCha8Rng) -> CandidateVector {
        (0..self.dimensions())
            .map(|d| rng.gen_range(self.lower[d]..=self.upper[d]))
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub method: SearchMethod,
    #[serde(default)]
    pub pso: PsoParams,
    #[serde(default)]
    pub ga: GaParams,
}

impl SearchConfig {
    pub fn new(method: SearchMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Population evaluated per iteration for the selected method.
    pub fn population_size(&self) -> usize {
        match self.method {
            SearchMethod::Random => 1,
            SearchMethod::Pso => self.pso.population_size,
            SearchMethod::Ga => self.ga.population_size,
        }
    }
}

pub fn rng_from_seed(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Build the strategy named by `config`, seeded deterministically from `seed`.
pub fn build(
    config: &SearchConfig,
    bounds: Bounds,
    iteration_budget: usize,
    seed: u64,
) -> Result<Box<dyn SearchStrategy>, SearchError> {
    if iteration_budget == 0 {
        return Err(SearchError::InvalidParameter {
            name: "iteration_budget",
            reason: "must be at least 1".to_string(),
        });
    }
    let rng = rng_from_seed(seed);
    Ok(match config.method {
        SearchMethod::Random => Box::new(RandomSearch::new(bounds, iteration_budget, rng)),
        SearchMethod::Pso => Box::new(ParticleSwarm::new(
            config.pso.clone(),
            bounds,
            iteration_budget,
            rng,
        )?),
        SearchMethod::Ga => Box::new(GeneticSearch::new(
            config.ga.clone(),
            bounds,
            iteration_budget,
            rng,
        )?),
    })
}

fn check_absorb(
    phase: SearchPhase,
    dimensions: usize,
    vector: &[f64],
) -> Result<(), SearchError> {
    if phase != SearchPhase::AwaitingEvaluation {
        return Err(SearchError::UnexpectedAbsorb);
    }
    if vector.len() != dimensions {
        return Err(SearchError::VectorLength {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Rewards that are not finite rank last.
fn sanitize_reward(reward: f64) -> f64 {
    if reward.is_nan() {
        f64::INFINITY
    } else {
        reward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_reject_degenerate_dimensions() {
        assert_eq!(Bounds::new(&[]), Err(SearchError::EmptyBounds));
        assert!(matches!(
            Bounds::new(&[(0.0, 1.0), (2.0, 2.0)]),
            Err(SearchError::InvalidBound { dimension: 1, .. })
        ));
    }

    #[test]
    fn bounds_reject_overflowing_width() {
        assert!(matches!(
            Bounds::new(&[(-1.0e308, 1.0e308)]),
            Err(SearchError::InvalidBound { dimension: 0, .. })
        ));
    }

    #[test]
    fn wide_finite_bounds_sample_without_panicking() {
        let bounds = Bounds::new(&[(-8.0e307, 8.0e307)]).unwrap();
        for method in SearchMethod::ALL {
            let mut strategy = build(&SearchConfig::new(method), bounds.clone(), 2, 7).unwrap();
            let vector = strategy.propose_next().unwrap();
            assert!(bounds.contains(&vector));
        }
    }

    #[test]
    fn clip_handles_nan_and_out_of_range() {
        let bounds = Bounds::new(&[(-1.0, 1.0)]).unwrap();
        assert_eq!(bounds.clip(0, f64::NAN), -1.0);
        assert_eq!(bounds.clip(0, 5.0), 1.0);
        assert_eq!(bounds.clip(0, f64::NEG_INFINITY), -1.0);
    }

    #[test]
    fn method_names_parse() {
        for method in SearchMethod::ALL {
            assert_eq!(method.as_str().parse::<SearchMethod>().unwrap(), method);
        }
        assert!("annealing".parse::<SearchMethod>().is_err());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let bounds = Bounds::new(&[(0.0, 1.0)]).unwrap();
        assert!(build(&SearchConfig::new(SearchMethod::Random), bounds, 0, 1).is_err());
    }
}
