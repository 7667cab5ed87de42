use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::model::Outcome;

/// Score assigned to invalid outcomes and to outcomes missing the data a function needs.
pub const PENALTY_REWARD: f64 = 1000.0;

const TTC_SCALE_S: f64 = 5.0;
const DISTANCE_SCALE_M: f64 = 50.0;
const TTC_WEIGHT: f64 = 0.5;
const DISTANCE_WEIGHT: f64 = 0.3;
const VELOCITY_WEIGHT: f64 = 0.2;
const SAFETY_MARGIN_EPSILON: f64 = 0.1;

/// Named scoring functions. Every function is total over `Outcome` and lower is better.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RewardFunction {
    Collision,
    #[default]
    Ttc,
    Distance,
    TtcDivDist,
    WeightedMulti,
    SafetyMargin,
}

impl RewardFunction {
    pub const ALL: [RewardFunction; 6] = [
        Self::Collision,
        Self::Ttc,
        Self::Distance,
        Self::TtcDivDist,
        Self::WeightedMulti,
        Self::SafetyMargin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collision => "collision",
            Self::Ttc => "ttc",
            Self::Distance => "distance",
            Self::TtcDivDist => "ttc_div_dist",
            Self::WeightedMulti => "weighted_multi",
            Self::SafetyMargin => "safety_margin",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Collision => "Binary collision reward: 0 on collision, 1 otherwise",
            Self::Ttc => "Minimum time-to-collision; 0 on collision",
            Self::Distance => "Minimum actor distance; 0 on collision",
            Self::TtcDivDist => "Ratio of time-to-collision to distance, favouring close fast approaches",
            Self::WeightedMulti => "Weighted sum of normalized TTC, distance and inverse ego velocity",
            Self::SafetyMargin => "Inverse of the tighter of the normalized TTC and distance margins",
        }
    }

    /// Score an outcome. Invalid outcomes and non-finite results map to `PENALTY_REWARD`.
    pub fn score(self, outcome: &Outcome) -> f64 {
        if !outcome.valid {
            return PENALTY_REWARD;
        }
        if outcome.collision_occurred {
            return 0.0;
        }

        let ttc = usable(outcome.min_time_to_collision);
        let distance = usable(outcome.min_distance);

        let raw = match self {
            Self::Collision => 1.0,
            Self::Ttc => ttc.unwrap_or(PENALTY_REWARD),
            Self::Distance => distance.unwrap_or(PENALTY_REWARD),
            Self::TtcDivDist => match (ttc, distance) {
                (Some(t), Some(d)) if d > 0.0 => t / d,
                (Some(t), _) => t,
                (None, Some(d)) => d,
                (None, None) => PENALTY_REWARD,
            },
            Self::WeightedMulti => weighted_multi(ttc, distance, usable(outcome.ego_velocity())),
            Self::SafetyMargin => match (ttc, distance) {
                (Some(t), Some(d)) => {
                    let margin = (t / TTC_SCALE_S).min(d / DISTANCE_SCALE_M);
                    1.0 / (margin + SAFETY_MARGIN_EPSILON)
                }
                (Some(t), None) => t,
                (None, Some(d)) => d,
                (None, None) => PENALTY_REWARD,
            },
        };

        if raw.is_finite() {
            raw
        } else {
            PENALTY_REWARD
        }
    }
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn weighted_multi(ttc: Option<f64>, distance: Option<f64>, ego_velocity: Option<f64>) -> f64 {
    if ttc.is_none() && distance.is_none() {
        return PENALTY_REWARD;
    }
    // A missing metric counts as fully safe.
    let ttc_term = ttc.map_or(1.0, |t| (t / TTC_SCALE_S).min(1.0));
    let distance_term = distance.map_or(1.0, |d| (d / DISTANCE_SCALE_M).min(1.0));
    let velocity_term = ego_velocity.map_or(0.0, |v| 1.0 / (v + 1.0));

    TTC_WEIGHT * ttc_term + DISTANCE_WEIGHT * distance_term + VELOCITY_WEIGHT * velocity_term
}

impl fmt::Display for RewardFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardFunction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == value)
            .ok_or_else(|| {
                let available: Vec<&str> = Self::ALL.iter().map(|f| f.as_str()).collect();
                format!(
                    "unknown reward function '{value}'. Available: {}",
                    available.join(", ")
                )
            })
    }
}
