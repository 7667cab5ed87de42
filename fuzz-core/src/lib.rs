pub mod discovery;
pub mod error;
pub mod model;
pub mod ranges;
pub mod reward;
pub mod search;

pub use discovery::{apply_vector, discover, DiscoveredScenario, ScenarioDescription};
pub use error::{ConfigError, DiscoveryError, RangeResolutionError, SearchError};
pub use model::{ActorState, CandidateVector, Outcome, ParameterSpec, SemanticType};
pub use ranges::{RangeConfiguration, ResolutionTier};
pub use reward::{RewardFunction, PENALTY_REWARD};
pub use search::{
    build as build_strategy, Bounds, GaParams, PsoParams, SearchConfig, SearchMethod,
    SearchPhase, SearchStrategy,
};
