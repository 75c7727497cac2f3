//! Goal kinds and their normalized parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GOAL_BUILDINGS: &str = "buildings";
pub const GOAL_ROADS: &str = "roads";
pub const GOAL_POPULATION: &str = "population";
pub const GOAL_HAPPINESS: &str = "happiness";
pub const GOAL_INCOME: &str = "income";

/// Highest wealth tier a population goal may filter on (0 = poor, 2 = rich).
pub const MAX_WEALTH_LEVEL: u8 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftGoal {
    pub draft_id: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PopulationGoal {
    /// `None` counts the whole population.
    pub wealth_level: Option<u8>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HappinessGoal {
    pub category: String,
    /// Fraction in [0, 1].
    pub target: f64,
}

/// Parameters of one goal kind, normalized at catalog load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", content = "params", rename_all = "snake_case")]
pub enum GoalParams {
    Drafts(Vec<DraftGoal>),
    Population(Vec<PopulationGoal>),
    Happiness(Vec<HappinessGoal>),
    Threshold(i64),
    /// Kinds without a built-in shape, left for an extension handler.
    Custom(Value),
}

pub type GoalsSpec = BTreeMap<String, GoalParams>;
