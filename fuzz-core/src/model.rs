use serde::{Deserialize, Serialize};

/// Ordered parameter values, aligned positionally with the run's `ParameterSpec` list.
pub type CandidateVector = Vec<f64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Velocity,
    Position,
    Timing,
    Unknown,
}

impl SemanticType {
    pub const CATEGORIES: [SemanticType; 3] = [Self::Velocity, Self::Position, Self::Timing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Velocity => "velocity",
            Self::Position => "position",
            Self::Timing => "timing",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_category(name: &str) -> Self {
        match name {
            "velocity" => Self::Velocity,
            "position" => Self::Position,
            "timing" => Self::Timing,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// `name` attribute of the scenario element the parameter belongs to.
    pub scenario_instance: String,
    pub scenario_type: String,
    pub current_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub semantic_type: SemanticType,
}

impl ParameterSpec {
    pub fn bounds(&self) -> (f64, f64) {
        (self.lower_bound, self.upper_bound)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub x: f64,
    pub y: f64,
    pub velocity: f64,
    pub yaw: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub collision_occurred: bool,
    #[serde(default)]
    pub min_time_to_collision: Option<f64>,
    #[serde(default)]
    pub min_distance: Option<f64>,
    #[serde(default)]
    pub ego: Option<ActorState>,
    #[serde(default)]
    pub npc: Option<ActorState>,
    pub run_number: u64,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Outcome {
    /// Outcome for an evaluation that crashed, timed out or produced unreadable data.
    pub fn invalid(run_number: u64, reason: impl Into<String>) -> Self {
        Self {
            collision_occurred: false,
            min_time_to_collision: None,
            min_distance: None,
            ego: None,
            npc: None,
            run_number,
            valid: false,
            failure: Some(reason.into()),
        }
    }

    pub fn ego_velocity(&self) -> Option<f64> {
        self.ego.map(|s| s.velocity)
    }

    pub fn npc_velocity(&self) -> Option<f64> {
        self.npc.map(|s| s.velocity)
    }
}
