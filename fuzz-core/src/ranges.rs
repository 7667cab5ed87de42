use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, RangeResolutionError};
use crate::model::{ParameterSpec, SemanticType};

pub type Range = (f64, f64);

/// Hard-coded range for parameters that classify as `unknown` and reach the fallback tier.
pub const GENERIC_FALLBACK_RANGE: Range = (1.0, 10.0);

const VELOCITY_TOKENS: [&str; 4] = ["v", "vel", "velocity", "speed"];
const POSITION_TOKENS: [&str; 10] = [
    "p", "pos", "position", "r", "distance", "dist", "gap", "offset", "x", "y",
];
const TIMING_TOKENS: [&str; 7] = ["t", "time", "delay", "duration", "reaction", "timeout", "wait"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    Conservative,
    WideRange,
}

impl FallbackStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::WideRange => "wide_range",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "conservative" | "intelligent_defaults" => Some(Self::Conservative),
            "wide_range" | "wide" => Some(Self::WideRange),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FallbackRanges {
    pub velocity_range: Range,
    pub position_range: Range,
    pub timing_range: Range,
}

impl FallbackRanges {
    pub const CONSERVATIVE: Self = Self {
        velocity_range: (1.0, 15.0),
        position_range: (5.0, 50.0),
        timing_range: (0.1, 5.0),
    };

    pub const WIDE: Self = Self {
        velocity_range: (0.1, 30.0),
        position_range: (1.0, 100.0),
        timing_range: (0.05, 10.0),
    };

    fn for_type(&self, semantic: SemanticType) -> Option<Range> {
        match semantic {
            SemanticType::Velocity => Some(self.velocity_range),
            SemanticType::Position => Some(self.position_range),
            SemanticType::Timing => Some(self.timing_range),
            SemanticType::Unknown => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FallbackPolicy {
    pub strategy: FallbackStrategy,
    pub conservative_defaults: FallbackRanges,
    pub wide_defaults: FallbackRanges,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            strategy: FallbackStrategy::Conservative,
            conservative_defaults: FallbackRanges::CONSERVATIVE,
            wide_defaults: FallbackRanges::WIDE,
        }
    }
}

impl FallbackPolicy {
    fn range_for(&self, semantic: SemanticType) -> Range {
        let ranges = match self.strategy {
            FallbackStrategy::Conservative => &self.conservative_defaults,
            FallbackStrategy::WideRange => &self.wide_defaults,
        };
        ranges.for_type(semantic).unwrap_or(GENERIC_FALLBACK_RANGE)
    }
}

/// Which resolution tier produced a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    UserOverride,
    ScenarioOverride,
    ParameterType,
    IntelligentDefault,
    Fallback,
}

impl ResolutionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserOverride => "user_override",
            Self::ScenarioOverride => "scenario_override",
            Self::ParameterType => "parameter_type",
            Self::IntelligentDefault => "intelligent_default",
            Self::Fallback => "fallback",
        }
    }
}

/// Layered parameter range policy.
///
/// Loaded once per process and shared read-only between runs. Every range stored here
/// has already been validated as finite with `min < max`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RangeConfiguration {
    pub parameter_types: BTreeMap<String, BTreeMap<String, Range>>,
    pub scenario_overrides: BTreeMap<String, BTreeMap<String, Range>>,
    pub fallback: FallbackPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigurationSummary {
    pub categories: usize,
    pub parameters: usize,
    pub scenario_types_with_overrides: usize,
    pub parameter_overrides: usize,
    pub fallback_strategy: &'static str,
}

impl Default for RangeConfiguration {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RangeConfiguration {
    /// Configuration with no parameter tables, only the default fallback policy.
    pub fn empty() -> Self {
        Self {
            parameter_types: BTreeMap::new(),
            scenario_overrides: BTreeMap::new(),
            fallback: FallbackPolicy::default(),
        }
    }

    /// Defaults used when no configuration file is supplied.
    pub fn builtin() -> Self {
        let mut parameter_types = BTreeMap::new();

        let velocity: BTreeMap<String, Range> = [
            ("absolute_v", (5.0, 25.0)),
            ("relative_v", (-15.0, 15.0)),
            ("v_ego", (0.1, 17.0)),
            ("v_1", (0.0, 15.0)),
            ("v_2", (0.0, 15.0)),
            ("v_3", (0.0, 15.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let position: BTreeMap<String, Range> = [
            ("relative_p", (5.0, 80.0)),
            ("relative_p_1", (5.0, 80.0)),
            ("relative_p_2", (5.0, 80.0)),
            ("relative_p_3", (5.0, 80.0)),
            ("r_ego", (10.0, 70.0)),
            ("r_1", (10.0, 70.0)),
            ("r_2", (10.0, 70.0)),
            ("r_3", (10.0, 70.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let timing: BTreeMap<String, Range> = [
            ("delay", (0.1, 3.0)),
            ("duration", (1.0, 10.0)),
            ("reaction_time", (0.2, 2.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        parameter_types.insert("velocity".to_string(), velocity);
        parameter_types.insert("position".to_string(), position);
        parameter_types.insert("timing".to_string(), timing);

        Self {
            parameter_types,
            scenario_overrides: BTreeMap::new(),
            fallback: FallbackPolicy::default(),
        }
    }

    /// Load a YAML range configuration. Missing files and malformed ranges are errors;
    /// nothing is silently dropped.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.display().to_string(),
            });
        }
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_yaml_str(&text)?;
        let summary = config.summary();
        tracing::info!(
            path = %path.display(),
            parameters = summary.parameters,
            overrides = summary.parameter_overrides,
            strategy = summary.fallback_strategy,
            "loaded range configuration"
        );
        Ok(config)
    }

    /// Parse a YAML document. Top-level sections that are absent keep their built-in
    /// defaults; sections that are present replace them.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Syntax {
            reason: e.to_string(),
        })?;

        let mut config = Self::builtin();
        let root = match root {
            Value::Null => return Ok(config),
            Value::Mapping(map) => map,
            _ => {
                return Err(ConfigError::NotAMapping {
                    key: "<root>".to_string(),
                })
            }
        };

        if let Some(section) = root.get("parameter_types") {
            config.parameter_types = parse_range_table(section, "parameter_types")?;
        }
        if let Some(section) = root.get("scenario_overrides") {
            config.scenario_overrides = parse_range_table(section, "scenario_overrides")?;
        }
        if let Some(section) = root.get("fallback") {
            config.fallback = parse_fallback(section)?;
        }

        Ok(config)
    }

    pub fn summary(&self) -> ConfigurationSummary {
        ConfigurationSummary {
            categories: self.parameter_types.len(),
            parameters: self.parameter_types.values().map(BTreeMap::len).sum(),
            scenario_types_with_overrides: self.scenario_overrides.len(),
            parameter_overrides: self.scenario_overrides.values().map(BTreeMap::len).sum(),
            fallback_strategy: self.fallback.strategy.as_str(),
        }
    }

    pub fn resolve(
        &self,
        name: &str,
        scenario_type: &str,
        current_value: f64,
        user_override: Option<Range>,
    ) -> Result<Range, RangeResolutionError> {
        self.resolve_with_tier(name, scenario_type, current_value, user_override)
            .map(|(range, _)| range)
    }

    /// Resolve a range and report which tier produced it. The first tier that yields a
    /// valid range wins; tiers are never merged.
    pub fn resolve_with_tier(
        &self,
        name: &str,
        scenario_type: &str,
        current_value: f64,
        user_override: Option<Range>,
    ) -> Result<(Range, ResolutionTier), RangeResolutionError> {
        if let Some(range) = user_override {
            if !is_valid_range(range) {
                return Err(RangeResolutionError::InvalidOverride {
                    parameter: name.to_string(),
                    lower: range.0,
                    upper: range.1,
                });
            }
            return Ok((range, ResolutionTier::UserOverride));
        }

        let semantic = classify(name);

        let candidates = [
            (
                ResolutionTier::ScenarioOverride,
                self.scenario_overrides
                    .get(scenario_type)
                    .and_then(|table| table.get(name))
                    .copied(),
            ),
            (ResolutionTier::ParameterType, self.parameter_type_range(name, semantic)),
            (
                ResolutionTier::IntelligentDefault,
                intelligent_default(semantic, current_value),
            ),
            (
                ResolutionTier::Fallback,
                Some(self.fallback.range_for(semantic)),
            ),
        ];

        for (tier, range) in candidates {
            match range {
                Some(range) if is_valid_range(range) => {
                    tracing::debug!(
                        parameter = name,
                        scenario_type,
                        tier = tier.as_str(),
                        lower = range.0,
                        upper = range.1,
                        "resolved parameter range"
                    );
                    return Ok((range, tier));
                }
                Some(range) => tracing::debug!(
                    parameter = name,
                    tier = tier.as_str(),
                    lower = range.0,
                    upper = range.1,
                    "skipping degenerate range"
                ),
                None => {}
            }
        }

        Err(RangeResolutionError::Unresolvable {
            parameter: name.to_string(),
        })
    }

    /// Fill in bounds for every discovered parameter.
    pub fn resolve_all(
        &self,
        specs: &mut [ParameterSpec],
        user_overrides: &HashMap<String, Range>,
    ) -> Result<(), RangeResolutionError> {
        for spec in specs.iter_mut() {
            let (lower, upper) = self.resolve(
                &spec.name,
                &spec.scenario_type,
                spec.current_value,
                user_overrides.get(&spec.name).copied(),
            )?;
            spec.lower_bound = lower;
            spec.upper_bound = upper;
        }
        Ok(())
    }

    fn parameter_type_range(&self, name: &str, semantic: SemanticType) -> Option<Range> {
        let classified = self
            .parameter_types
            .get(semantic.as_str())
            .and_then(|table| table.get(name))
            .copied();
        classified.or_else(|| {
            self.parameter_types
                .values()
                .find_map(|table| table.get(name).copied())
        })
    }
}

pub fn is_valid_range((lower, upper): Range) -> bool {
    lower.is_finite() && upper.is_finite() && lower < upper && (upper - lower).is_finite()
}

/// Classify a parameter name by its `_`-separated tokens, scanning from the last token
/// so suffixes such as `absolute_v` or `reaction_time` win. Trailing digits are ignored
/// (`v1` reads as `v`).
pub fn classify(name: &str) -> SemanticType {
    let lowered = name.to_ascii_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(|t| t.trim_end_matches(|c: char| c.is_ascii_digit()))
        .filter(|t| !t.is_empty())
        .collect();

    for token in tokens.iter().rev() {
        if VELOCITY_TOKENS.contains(token) {
            return SemanticType::Velocity;
        }
        if POSITION_TOKENS.contains(token) {
            return SemanticType::Position;
        }
        if TIMING_TOKENS.contains(token) {
            return SemanticType::Timing;
        }
    }

    if lowered.contains("velocity") || lowered.contains("speed") {
        SemanticType::Velocity
    } else if lowered.contains("distance") || lowered.contains("position") {
        SemanticType::Position
    } else if lowered.contains("time") || lowered.contains("delay") || lowered.contains("duration")
    {
        SemanticType::Timing
    } else {
        SemanticType::Unknown
    }
}

/// Range derived from the parameter's current value. `None` when the value is zero
/// (the multiplicative range would be empty).
pub fn intelligent_default(semantic: SemanticType, current_value: f64) -> Option<Range> {
    if current_value == 0.0 || !current_value.is_finite() {
        return None;
    }

    let (low_factor, high_factor, floor) = match semantic {
        SemanticType::Velocity => (0.5, 1.5, Some(0.0)),
        SemanticType::Position => (0.7, 1.3, Some(1.0)),
        SemanticType::Timing => (0.5, 2.0, Some(0.1)),
        SemanticType::Unknown => (0.8, 1.2, None),
    };

    let a = current_value * low_factor;
    let b = current_value * high_factor;
    let (mut lower, upper) = if a <= b { (a, b) } else { (b, a) };

    if let Some(floor) = floor {
        if lower < floor && floor < upper {
            lower = floor;
        }
    }

    Some((lower, upper))
}

fn key_string(key: &Value, parent: &str) -> Result<String, ConfigError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigError::NotAMapping {
            key: parent.to_string(),
        }),
    }
}

fn as_mapping<'a>(value: &'a Value, key: &str) -> Result<&'a Mapping, ConfigError> {
    match value {
        Value::Mapping(map) => Ok(map),
        _ => Err(ConfigError::NotAMapping {
            key: key.to_string(),
        }),
    }
}

fn parse_range(value: &Value, key: &str) -> Result<Range, ConfigError> {
    let items = match value {
        Value::Sequence(items) => items,
        _ => {
            return Err(ConfigError::NonNumeric {
                key: key.to_string(),
            })
        }
    };
    if items.len() != 2 {
        return Err(ConfigError::WrongArity {
            key: key.to_string(),
            found: items.len(),
        });
    }

    let bound = |v: &Value| {
        v.as_f64().ok_or_else(|| ConfigError::NonNumeric {
            key: key.to_string(),
        })
    };
    let min = bound(&items[0])?;
    let max = bound(&items[1])?;

    if !min.is_finite() || !max.is_finite() || !(max - min).is_finite() {
        return Err(ConfigError::NonFinite {
            key: key.to_string(),
        });
    }
    if min >= max {
        return Err(ConfigError::EmptyRange {
            key: key.to_string(),
            min,
            max,
        });
    }
    Ok((min, max))
}

fn parse_range_table(
    section: &Value,
    section_key: &str,
) -> Result<BTreeMap<String, BTreeMap<String, Range>>, ConfigError> {
    let mut table = BTreeMap::new();
    if section.is_null() {
        return Ok(table);
    }

    for (group, entries) in as_mapping(section, section_key)? {
        let group = key_string(group, section_key)?;
        let group_key = format!("{section_key}.{group}");
        let mut ranges = BTreeMap::new();
        if !entries.is_null() {
            for (name, range) in as_mapping(entries, &group_key)? {
                let name = key_string(name, &group_key)?;
                let range = parse_range(range, &format!("{group_key}.{name}"))?;
                ranges.insert(name, range);
            }
        }
        table.insert(group, ranges);
    }
    Ok(table)
}

fn parse_fallback_ranges(
    value: Option<&Value>,
    key: &str,
    defaults: FallbackRanges,
) -> Result<FallbackRanges, ConfigError> {
    let Some(value) = value else {
        return Ok(defaults);
    };
    let map = as_mapping(value, key)?;
    let field = |name: &str, default: Range| -> Result<Range, ConfigError> {
        match map.get(name) {
            Some(v) => parse_range(v, &format!("{key}.{name}")),
            None => Ok(default),
        }
    };
    Ok(FallbackRanges {
        velocity_range: field("velocity_range", defaults.velocity_range)?,
        position_range: field("position_range", defaults.position_range)?,
        timing_range: field("timing_range", defaults.timing_range)?,
    })
}

fn parse_fallback(section: &Value) -> Result<FallbackPolicy, ConfigError> {
    if section.is_null() {
        return Ok(FallbackPolicy::default());
    }
    let map = as_mapping(section, "fallback")?;

    let strategy = match map.get("strategy") {
        None => FallbackStrategy::Conservative,
        Some(Value::String(s)) => {
            FallbackStrategy::parse(s).ok_or_else(|| ConfigError::UnknownStrategy {
                key: "fallback.strategy".to_string(),
                found: s.clone(),
            })?
        }
        Some(other) => {
            return Err(ConfigError::UnknownStrategy {
                key: "fallback.strategy".to_string(),
                found: format!("{other:?}"),
            })
        }
    };

    Ok(FallbackPolicy {
        strategy,
        conservative_defaults: parse_fallback_ranges(
            map.get("conservative_defaults"),
            "fallback.conservative_defaults",
            FallbackRanges::CONSERVATIVE,
        )?,
        wide_defaults: parse_fallback_ranges(
            map.get("wide_defaults"),
            "fallback.wide_defaults",
            FallbackRanges::WIDE,
        )?,
    })
}
