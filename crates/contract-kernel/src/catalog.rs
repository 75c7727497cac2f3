//! Normalized contract definitions keyed by identifier.
//!
//! Loading is permissive: entries without the contract tag or an identifier
//! are skipped, and out-of-range values are clamped instead of rejected.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use contracts::goals::{
    DraftGoal, GoalParams, GoalsSpec, HappinessGoal, PopulationGoal, GOAL_BUILDINGS,
    GOAL_HAPPINESS, GOAL_INCOME, GOAL_POPULATION, GOAL_ROADS, MAX_WEALTH_LEVEL,
};
use contracts::{ContractDefinition, RequirementsSpec, CONTRACT_KIND_TAG};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog document must be an array or an object with a `contracts` array")]
    UnexpectedShape,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    definitions: BTreeMap<String, Arc<ContractDefinition>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(raw_definitions: &[Value]) -> Self {
        let mut catalog = Self::new();
        catalog.load(raw_definitions);
        catalog
    }

    /// Accepts a JSON array of raw entries or `{ "contracts": [...] }`.
    pub fn from_json_str(document: &str) -> Result<Self, CatalogError> {
        let parsed: Value = serde_json::from_str(document)?;
        Self::from_document(&parsed)
    }

    pub fn from_document(document: &Value) -> Result<Self, CatalogError> {
        let entries = match document {
            Value::Array(entries) => entries,
            Value::Object(root) => root
                .get("contracts")
                .and_then(Value::as_array)
                .ok_or(CatalogError::UnexpectedShape)?,
            _ => return Err(CatalogError::UnexpectedShape),
        };
        Ok(Self::from_entries(entries))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json_str(&document)
    }

    /// Replaces the whole mapping with the normalized entries of `raw_definitions`.
    /// Returns the number of definitions indexed.
    pub fn load(&mut self, raw_definitions: &[Value]) -> usize {
        let mut definitions = BTreeMap::new();
        for raw in raw_definitions {
            let Some(definition) = normalize_definition(raw) else {
                continue;
            };
            if definitions.contains_key(&definition.contract_id) {
                debug!(
                    contract_id = %definition.contract_id,
                    "duplicate contract id, later entry wins"
                );
            }
            definitions.insert(definition.contract_id.clone(), Arc::new(definition));
        }
        self.definitions = definitions;
        self.definitions.len()
    }

    pub fn get(&self, contract_id: &str) -> Option<&Arc<ContractDefinition>> {
        self.definitions.get(contract_id)
    }

    pub fn get_all(&self) -> &BTreeMap<String, Arc<ContractDefinition>> {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn normalize_definition(raw: &Value) -> Option<ContractDefinition> {
    let entry = raw.as_object()?;

    if entry.get("type").and_then(Value::as_str) != Some(CONTRACT_KIND_TAG) {
        debug!("skipping catalog entry without contract tag");
        return None;
    }
    let Some(contract_id) = entry.get("id").and_then(Value::as_str) else {
        debug!("skipping contract entry without id");
        return None;
    };

    Some(ContractDefinition {
        contract_id: contract_id.to_string(),
        title: string_field(entry, &["title"]).unwrap_or_else(|| contract_id.to_string()),
        description: string_field(entry, &["text", "description"]).unwrap_or_default(),
        advance: money_field(entry, &["advance"]),
        reward: money_field(entry, &["reward"]),
        fee: money_field(entry, &["fee", "cancellation_fee"]),
        requirements: entry.get("requirements").and_then(normalize_requirements),
        goals: normalize_goals(entry.get("goals")),
    })
}

fn field<'a>(entry: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| entry.get(*key))
}

fn string_field(entry: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    field(entry, keys)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|raw| raw.round() as i64))
}

fn money_field(entry: &Map<String, Value>, keys: &[&str]) -> i64 {
    field(entry, keys).and_then(integer).unwrap_or(0).max(0)
}

fn count_field(entry: &Map<String, Value>, keys: &[&str]) -> u64 {
    field(entry, keys)
        .and_then(integer)
        .unwrap_or(1)
        .max(1) as u64
}

fn normalize_requirements(raw: &Value) -> Option<RequirementsSpec> {
    let entry = raw.as_object()?;
    let min_rank = field(entry, &["rank", "min_rank"])
        .and_then(integer)
        .map(|rank| rank.clamp(0, i64::from(u32::MAX)) as u32);
    let contracts = field(entry, &["contracts"])
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if min_rank.is_none() && contracts.is_empty() {
        return None;
    }
    Some(RequirementsSpec {
        min_rank,
        contracts,
    })
}

/// A single object is read as a one-element list.
fn goal_items(raw: &Value) -> Vec<&Map<String, Value>> {
    match raw {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(item) => vec![item],
        _ => Vec::new(),
    }
}

fn normalize_goals(raw: Option<&Value>) -> GoalsSpec {
    let mut goals = GoalsSpec::new();
    let Some(Value::Object(kinds)) = raw else {
        return goals;
    };

    for (kind, params) in kinds {
        let normalized = match kind.as_str() {
            GOAL_BUILDINGS | GOAL_ROADS => GoalParams::Drafts(
                goal_items(params)
                    .into_iter()
                    .filter_map(|item| {
                        let draft_id = string_field(item, &["id", "draft", "draft_id"])?;
                        Some(DraftGoal {
                            draft_id,
                            count: count_field(item, &["count"]).min(u64::from(u32::MAX)) as u32,
                        })
                    })
                    .collect(),
            ),
            GOAL_POPULATION => GoalParams::Population(
                goal_items(params)
                    .into_iter()
                    .map(|item| PopulationGoal {
                        wealth_level: field(item, &["level", "wealth", "wealth_level"])
                            .and_then(integer)
                            .filter(|level| (0..=i64::from(MAX_WEALTH_LEVEL)).contains(level))
                            .map(|level| level as u8),
                        count: count_field(item, &["count"]),
                    })
                    .collect(),
            ),
            GOAL_HAPPINESS => GoalParams::Happiness(
                goal_items(params)
                    .into_iter()
                    .filter_map(|item| {
                        let category = string_field(item, &["category", "type"])?;
                        let target = field(item, &["target", "value"])
                            .and_then(Value::as_f64)
                            .unwrap_or(1.0)
                            .clamp(0.0, 1.0);
                        Some(HappinessGoal { category, target })
                    })
                    .collect(),
            ),
            GOAL_INCOME => match integer(params) {
                Some(threshold) => GoalParams::Threshold(threshold),
                None => GoalParams::Custom(params.clone()),
            },
            _ => GoalParams::Custom(params.clone()),
        };
        goals.insert(kind.clone(), normalized);
    }

    goals
}
