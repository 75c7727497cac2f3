use std::collections::{BTreeMap, BTreeSet};

use contracts::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::host::CityHost;

/// In-memory fact store standing in for the host simulation.
///
/// It reproduces no simulation mechanics: commands set facts directly and
/// goal checks read them back.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CityModel {
    pub funds: i64,
    pub rank: u32,
    pub monthly_income: i64,
    #[serde(default)]
    pub draft_counts: BTreeMap<String, u64>,
    /// Population per wealth tier (0..=2).
    #[serde(default)]
    pub population_by_wealth: BTreeMap<u8, u64>,
    #[serde(default)]
    pub happiness: BTreeMap<String, f64>,
    /// Draft ids known to the content catalog. Empty means every id resolves.
    #[serde(default)]
    pub known_drafts: BTreeSet<String>,
}

impl CityModel {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            funds: config.starting_funds,
            rank: config.starting_rank,
            ..Self::default()
        }
    }

    pub fn with_known_drafts<I, S>(mut self, drafts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_drafts = drafts.into_iter().map(Into::into).collect();
        self
    }

    /// Records `count` new instances of a draft and returns the new total.
    pub fn place_draft(&mut self, draft_id: &str, count: u32) -> u64 {
        let total = self.draft_counts.entry(draft_id.to_string()).or_insert(0);
        *total = total.saturating_add(u64::from(count));
        *total
    }

    pub fn set_population(&mut self, wealth_level: Option<u8>, count: u64) {
        match wealth_level {
            Some(level) => {
                self.population_by_wealth.insert(level, count);
            }
            // Without a tier the total is booked on the middle tier.
            None => {
                self.population_by_wealth.clear();
                self.population_by_wealth.insert(1, count);
            }
        }
    }

    pub fn set_happiness(&mut self, category: &str, value: f64) {
        self.happiness
            .insert(category.to_string(), value.clamp(0.0, 1.0));
    }
}

impl CityHost for CityModel {
    fn draft_count(&self, draft_id: &str) -> u64 {
        self.draft_counts.get(draft_id).copied().unwrap_or(0)
    }

    fn population(&self, wealth_level: Option<u8>) -> u64 {
        match wealth_level {
            Some(level) => self
                .population_by_wealth
                .get(&level)
                .copied()
                .unwrap_or(0),
            None => self
                .population_by_wealth
                .values()
                .fold(0_u64, |total, count| total.saturating_add(*count)),
        }
    }

    fn happiness(&self, category: &str) -> f64 {
        self.happiness.get(category).copied().unwrap_or(0.0)
    }

    fn monthly_income(&self) -> i64 {
        self.monthly_income
    }

    fn rank(&self) -> u32 {
        self.rank
    }

    fn funds(&self) -> i64 {
        self.funds
    }

    fn credit(&mut self, amount: i64) {
        self.funds = self.funds.saturating_add(amount);
    }

    fn debit(&mut self, amount: i64) {
        self.funds = self.funds.saturating_sub(amount);
    }

    fn resolve_draft(&self, draft_id: &str) -> Option<String> {
        if self.known_drafts.is_empty() || self.known_drafts.contains(draft_id) {
            Some(draft_id.to_string())
        } else {
            None
        }
    }
}
