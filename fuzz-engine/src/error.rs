use std::fmt;

use scenario_fuzz_core::{ConfigError, DiscoveryError, RangeResolutionError, SearchError};
use uuid::Uuid;

/// Errors that prevent a run from starting. Per-evaluation failures never surface here;
/// they are folded into the run's history as invalid outcomes.
#[derive(Debug)]
pub enum FuzzError {
    Configuration(ConfigError),
    Discovery(DiscoveryError),
    RangeResolution(RangeResolutionError),
    Search(SearchError),
    Store(String),
    AtCapacity { limit: usize },
    UnknownRun(Uuid),
    Internal(String),
}

impl fmt::Display for FuzzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::Discovery(e) => write!(f, "discovery error: {e}"),
            Self::RangeResolution(e) => write!(f, "range resolution error: {e}"),
            Self::Search(e) => write!(f, "search setup error: {e}"),
            Self::Store(e) => write!(f, "result store error: {e}"),
            Self::AtCapacity { limit } => {
                write!(f, "run rejected: {limit} concurrent run(s) already active")
            }
            Self::UnknownRun(id) => write!(f, "unknown run {id}"),
            Self::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for FuzzError {}

impl From<ConfigError> for FuzzError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e)
    }
}

impl From<DiscoveryError> for FuzzError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

impl From<RangeResolutionError> for FuzzError {
    fn from(e: RangeResolutionError) -> Self {
        Self::RangeResolution(e)
    }
}

impl From<SearchError> for FuzzError {
    fn from(e: SearchError) -> Self {
        Self::Search(e)
    }
}
