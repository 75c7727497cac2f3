//! Session (re-)entry.
//!
//! Construction subscriptions are session-local and are lost when a city is
//! reloaded while contract state survives. Entering a session rebuilds them
//! for every active contract and re-evaluates each one at once, since goals
//! may have been met while nothing was listening.

use std::sync::Arc;

use contracts::{ContractEvent, ContractStatus, SessionConfig, SessionStore};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::goals::GoalRegistry;
use crate::host::CityHost;
use crate::lifecycle::{ContractBook, ContractState};

impl ContractBook {
    /// Rebuilds a book from its persisted store and enters the session.
    pub fn restore(
        config: &SessionConfig,
        catalog: Arc<Catalog>,
        registry: Arc<GoalRegistry>,
        store: SessionStore,
        host: &mut dyn CityHost,
    ) -> Self {
        Self::restore_with_history(config, catalog, registry, store, Vec::new(), 0, host)
    }

    /// Like [`ContractBook::restore`], continuing an existing event log so
    /// sequence numbers stay unique across reloads.
    pub fn restore_with_history(
        config: &SessionConfig,
        catalog: Arc<Catalog>,
        registry: Arc<GoalRegistry>,
        store: SessionStore,
        history: Vec<ContractEvent>,
        day: u64,
        host: &mut dyn CityHost,
    ) -> Self {
        let mut book = Self::new(config, catalog, registry);
        book.events = history;
        book.day = day;
        book.completed = store.completed;

        for (contract_id, record) in store.active {
            if record.status == ContractStatus::Completed || book.completed.contains(&contract_id)
            {
                warn!(%contract_id, "persisted active contract is already completed");
                book.completed.insert(contract_id);
                continue;
            }
            let Some(definition) = book.catalog.get(&contract_id).cloned() else {
                warn!(%contract_id, "persisted active contract missing from catalog, dropped");
                continue;
            };
            if !book.can_accept() {
                warn!(%contract_id, max_active = book.max_active, "persisted active contract over capacity, dropped");
                continue;
            }
            book.active
                .insert(contract_id, ContractState::restored(definition, &record));
        }

        book.enter_session(host);
        book
    }

    /// Re-arms every active contract and re-checks it. Returns the number of
    /// contracts completed by the re-check.
    pub fn enter_session(&mut self, host: &mut dyn CityHost) -> usize {
        self.listeners.clear();

        let contract_ids = self.active.keys().cloned().collect::<Vec<_>>();
        for contract_id in &contract_ids {
            if let Some(state) = self.active.get_mut(contract_id) {
                state.set_dirty(false);
                state.set_requires_periodic_evaluation(false);
                self.registry
                    .initialize_all(state, &mut self.listeners, &*host);
            }
        }

        let mut completed = 0;
        for contract_id in &contract_ids {
            if self.check_completion(contract_id, host) {
                completed += 1;
            }
        }

        info!(
            active = self.active.len(),
            completed,
            subscriptions = self.listeners.subscription_count(),
            "contract session entered"
        );
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::CityModel;
    use contracts::ContractRecord;
    use serde_json::json;

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_entries(&[
            json!({
                "id": "$park",
                "type": "contract",
                "reward": 400,
                "goals": { "buildings": [{ "id": "$park00", "count": 2 }] }
            }),
            json!({
                "id": "$income",
                "type": "contract",
                "reward": 900,
                "goals": { "income": 500 }
            }),
        ]))
    }

    fn record(contract_id: &str) -> ContractRecord {
        ContractRecord {
            contract_id: contract_id.to_string(),
            status: ContractStatus::Active,
            requires_periodic_evaluation: false,
        }
    }

    fn store(active: &[&str], completed: &[&str]) -> SessionStore {
        SessionStore {
            active: active
                .iter()
                .map(|contract_id| (contract_id.to_string(), record(contract_id)))
                .collect(),
            completed: completed.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[test]
    fn restore_rebuilds_subscriptions_and_flags() {
        let mut city = CityModel::default();
        let book = ContractBook::restore(
            &SessionConfig::default(),
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
            store(&["$park", "$income"], &[]),
            &mut city,
        );

        assert_eq!(book.get_active().len(), 2);
        assert_eq!(
            book.listeners().subscribers("$park00").collect::<Vec<_>>(),
            vec!["$park"]
        );
        let income = book.active_state("$income").expect("income active");
        assert!(income.requires_periodic_evaluation());
        assert!(!income.is_dirty());
    }

    #[test]
    fn restore_completes_goals_met_while_detached() {
        let mut city = CityModel::default();
        city.place_draft("$park00", 2);

        let book = ContractBook::restore(
            &SessionConfig::default(),
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
            store(&["$park"], &[]),
            &mut city,
        );

        assert!(book.is_completed("$park"));
        assert!(book.get_active().is_empty());
        assert_eq!(city.funds, 400);
    }

    #[test]
    fn restore_keeps_store_disjoint_and_drops_unknown() {
        let mut city = CityModel::default();
        let book = ContractBook::restore(
            &SessionConfig::default(),
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
            store(&["$park", "$vanished", "$income"], &["$income"]),
            &mut city,
        );

        let persisted = book.store();
        assert!(persisted.is_disjoint());
        assert_eq!(persisted.active.keys().collect::<Vec<_>>(), vec!["$park"]);
        assert!(persisted.completed.contains("$income"));
    }

    #[test]
    fn restore_continues_event_sequence() {
        let mut city = CityModel::default();
        city.place_draft("$park00", 2);
        let mut first = ContractBook::new(
            &SessionConfig::default(),
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
        );
        first.on_new_day(1, &mut city);
        first.on_new_day(2, &mut city);

        let book = ContractBook::restore_with_history(
            &SessionConfig::default(),
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
            store(&["$park"], &[]),
            first.events().to_vec(),
            2,
            &mut city,
        );

        let last = book.events().last().expect("completion recorded");
        assert_eq!(last.sequence, 3);
        assert_eq!(last.day, 2);
        assert_eq!(last.contract_id.as_deref(), Some("$park"));
    }

    #[test]
    fn reentry_replaces_stale_subscriptions() {
        let mut city = CityModel::default();
        let mut book = ContractBook::new(
            &SessionConfig::default(),
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
        );
        assert!(book.accept("$park", &mut city));
        book.notify_constructed("$park00");

        assert_eq!(book.enter_session(&mut city), 0);
        assert_eq!(book.listeners().subscription_count(), 1);
        assert!(!book.active_state("$park").expect("active").is_dirty());
    }
}
