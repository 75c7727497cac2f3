//! Once-per-day evaluation pass.
//!
//! Construction events only flag contracts dirty, so building and road goals
//! complete on the next simulated day at the earliest. Poll-based goals
//! (population, happiness, income) are re-checked every day.

use contracts::ContractEventType;
use serde_json::json;
use tracing::debug;

use crate::host::CityHost;
use crate::lifecycle::ContractBook;

impl ContractBook {
    /// Runs the daily hook for `day` and returns the ids completed by it.
    pub fn on_new_day(&mut self, day: u64, host: &mut dyn CityHost) -> Vec<String> {
        self.day = day;

        let due = self
            .active
            .values()
            .filter(|state| state.requires_periodic_evaluation() || state.is_dirty())
            .map(|state| state.contract_id().to_string())
            .collect::<Vec<_>>();

        let mut completed = Vec::new();
        for contract_id in &due {
            if let Some(state) = self.active.get_mut(contract_id) {
                state.set_dirty(false);
            }
            if self.check_completion(contract_id, host) {
                completed.push(contract_id.clone());
            }
        }

        debug!(day, checked = due.len(), completed = completed.len(), "daily contract pass");
        self.record_event(
            ContractEventType::DayAdvanced,
            None,
            None,
            Some(json!({ "checked": due, "completed": completed })),
        );
        completed
    }
}
