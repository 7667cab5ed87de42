use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    Missing { path: String },
    Unreadable { path: String, reason: String },
    Syntax { reason: String },
    NotAMapping { key: String },
    NonNumeric { key: String },
    WrongArity { key: String, found: usize },
    NonFinite { key: String },
    EmptyRange { key: String, min: f64, max: f64 },
    UnknownStrategy { key: String, found: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { path } => write!(f, "range configuration not found: {path}"),
            Self::Unreadable { path, reason } => {
                write!(f, "failed to read range configuration {path}: {reason}")
            }
            Self::Syntax { reason } => write!(f, "range configuration is not valid YAML: {reason}"),
            Self::NotAMapping { key } => write!(f, "{key}: expected a mapping"),
            Self::NonNumeric { key } => write!(f, "{key}: range bounds must be numeric"),
            Self::WrongArity { key, found } => {
                write!(f, "{key}: expected [min, max], got {found} element(s)")
            }
            Self::NonFinite { key } => write!(f, "{key}: range bounds and width must be finite"),
            Self::EmptyRange { key, min, max } => {
                write!(f, "{key}: min ({min}) must be strictly less than max ({max})")
            }
            Self::UnknownStrategy { key, found } => write!(
                f,
                "{key}: unknown fallback strategy '{found}' (expected conservative, wide_range or intelligent_defaults)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryError {
    Io { path: String, reason: String },
    Xml { reason: String },
    RouteNotFound { route_id: String },
    NonNumeric { scenario: String, parameter: String, value: String },
    NoMutableParameters,
    VectorLength { expected: usize, actual: usize },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => {
                write!(f, "failed to read scenario description {path}: {reason}")
            }
            Self::Xml { reason } => write!(f, "malformed scenario description: {reason}"),
            Self::RouteNotFound { route_id } => {
                write!(f, "route '{route_id}' not found in scenario description")
            }
            Self::NonNumeric {
                scenario,
                parameter,
                value,
            } => write!(
                f,
                "fuzzable parameter {scenario}.{parameter} has non-numeric value '{value}'"
            ),
            Self::NoMutableParameters => {
                write!(f, "scenario description declares no fuzzable parameters")
            }
            Self::VectorLength { expected, actual } => write!(
                f,
                "candidate vector has {actual} value(s), scenario declares {expected}"
            ),
        }
    }
}

impl std::error::Error for DiscoveryError {}

#[derive(Clone, Debug, PartialEq)]
pub enum RangeResolutionError {
    InvalidOverride { parameter: String, lower: f64, upper: f64 },
    Unresolvable { parameter: String },
}

impl fmt::Display for RangeResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOverride {
                parameter,
                lower,
                upper,
            } => write!(
                f,
                "user override for '{parameter}' is not a valid range: ({lower}, {upper})"
            ),
            Self::Unresolvable { parameter } => {
                write!(f, "no valid range could be resolved for '{parameter}'")
            }
        }
    }
}

impl std::error::Error for RangeResolutionError {}

#[derive(Clone, Debug, PartialEq)]
pub enum SearchError {
    EmptyBounds,
    InvalidBound { dimension: usize, lower: f64, upper: f64 },
    InvalidParameter { name: &'static str, reason: String },
    UnknownMethod { found: String },
    UnexpectedAbsorb,
    VectorLength { expected: usize, actual: usize },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBounds => write!(f, "search space has no dimensions"),
            Self::InvalidBound {
                dimension,
                lower,
                upper,
            } => write!(
                f,
                "dimension {dimension} has invalid bounds ({lower}, {upper})"
            ),
            Self::InvalidParameter { name, reason } => write!(f, "invalid {name}: {reason}"),
            Self::UnknownMethod { found } => {
                write!(f, "unknown search method '{found}' (expected random, pso or ga)")
            }
            Self::UnexpectedAbsorb => write!(f, "absorb called without a pending proposal"),
            Self::VectorLength { expected, actual } => write!(
                f,
                "absorbed vector has {actual} value(s), expected {expected}"
            ),
        }
    }
}

impl std::error::Error for SearchError {}
