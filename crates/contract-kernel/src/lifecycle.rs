//! Contract lifecycle: accept, complete and cancel.
//!
//! `ContractBook` exclusively owns the active and completed collections. Money
//! moves and notifications happen only inside [`ContractBook::accept`],
//! [`ContractBook::complete`] and [`ContractBook::cancel`]; construction
//! notifications merely set a dirty flag. Disallowed operations are silent
//! no-ops that return `false`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use contracts::{
    ContractDefinition, ContractEvent, ContractEventType, ContractRecord, ContractStatus,
    RequirementStatus, SessionConfig, SessionStore, SCHEMA_VERSION_V1,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::goals::GoalRegistry;
use crate::host::CityHost;
use crate::listeners::ListenerTable;
use crate::requirements::requirement_status;

/// Runtime state of one active contract.
#[derive(Debug, Clone)]
pub struct ContractState {
    contract_id: String,
    definition: Arc<ContractDefinition>,
    status: ContractStatus,
    requires_periodic_evaluation: bool,
    dirty: bool,
}

impl ContractState {
    pub fn new(definition: Arc<ContractDefinition>) -> Self {
        Self {
            contract_id: definition.contract_id.clone(),
            definition,
            status: ContractStatus::Active,
            requires_periodic_evaluation: false,
            dirty: false,
        }
    }

    pub(crate) fn restored(definition: Arc<ContractDefinition>, record: &ContractRecord) -> Self {
        Self {
            contract_id: record.contract_id.clone(),
            definition,
            status: record.status,
            requires_periodic_evaluation: record.requires_periodic_evaluation,
            dirty: false,
        }
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn definition(&self) -> &Arc<ContractDefinition> {
        &self.definition
    }

    pub fn status(&self) -> ContractStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ContractStatus::Active
    }

    pub fn requires_periodic_evaluation(&self) -> bool {
        self.requires_periodic_evaluation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_requires_periodic_evaluation(&mut self, value: bool) {
        self.requires_periodic_evaluation = value;
    }

    pub(crate) fn set_dirty(&mut self, value: bool) {
        self.dirty = value;
    }

    pub fn record(&self) -> ContractRecord {
        ContractRecord {
            contract_id: self.contract_id.clone(),
            status: self.status,
            requires_periodic_evaluation: self.requires_periodic_evaluation,
        }
    }
}

/// A locked definition one step away from availability, tagged with its tier.
#[derive(Debug, Clone)]
pub struct AlmostAvailable {
    pub definition: Arc<ContractDefinition>,
    pub status: RequirementStatus,
}

pub type ContractObserver = Box<dyn FnMut(&ContractState) + Send>;

pub struct ContractBook {
    pub(crate) session_id: String,
    pub(crate) max_active: usize,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) registry: Arc<GoalRegistry>,
    pub(crate) active: BTreeMap<String, ContractState>,
    pub(crate) completed: BTreeSet<String>,
    pub(crate) listeners: ListenerTable,
    completion_observers: Vec<ContractObserver>,
    cancellation_observers: Vec<ContractObserver>,
    pub(crate) events: Vec<ContractEvent>,
    pub(crate) day: u64,
}

impl ContractBook {
    pub fn new(config: &SessionConfig, catalog: Arc<Catalog>, registry: Arc<GoalRegistry>) -> Self {
        Self {
            session_id: config.session_id.clone(),
            max_active: config.max_active,
            catalog,
            registry,
            active: BTreeMap::new(),
            completed: BTreeSet::new(),
            listeners: ListenerTable::default(),
            completion_observers: Vec::new(),
            cancellation_observers: Vec::new(),
            events: Vec::new(),
            day: 0,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn can_accept(&self) -> bool {
        self.active.len() < self.max_active
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<GoalRegistry> {
        &self.registry
    }

    pub fn listeners(&self) -> &ListenerTable {
        &self.listeners
    }

    pub fn day(&self) -> u64 {
        self.day
    }

    pub fn events(&self) -> &[ContractEvent] {
        &self.events
    }

    pub fn get_active(&self) -> Vec<&ContractState> {
        self.active.values().collect()
    }

    pub fn active_state(&self, contract_id: &str) -> Option<&ContractState> {
        self.active.get(contract_id)
    }

    pub fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }

    pub fn is_completed(&self, contract_id: &str) -> bool {
        self.completed.contains(contract_id)
    }

    /// Persisted form: active records plus completed ids, no transient flags.
    pub fn store(&self) -> SessionStore {
        SessionStore {
            active: self
                .active
                .iter()
                .map(|(contract_id, state)| (contract_id.clone(), state.record()))
                .collect(),
            completed: self.completed.clone(),
        }
    }

    pub fn on_completed(&mut self, observer: impl FnMut(&ContractState) + Send + 'static) {
        self.completion_observers.push(Box::new(observer));
    }

    pub fn on_cancelled(&mut self, observer: impl FnMut(&ContractState) + Send + 'static) {
        self.cancellation_observers.push(Box::new(observer));
    }

    pub fn requirement_status(
        &self,
        definition: &ContractDefinition,
        host: &dyn CityHost,
    ) -> RequirementStatus {
        requirement_status(definition, &self.completed, host.rank())
    }

    fn is_open(&self, contract_id: &str) -> bool {
        !self.active.contains_key(contract_id) && !self.completed.contains(contract_id)
    }

    /// Definitions that are neither active nor completed and fully available.
    pub fn get_available(&self, host: &dyn CityHost) -> Vec<Arc<ContractDefinition>> {
        self.catalog
            .get_all()
            .values()
            .filter(|definition| self.is_open(&definition.contract_id))
            .filter(|definition| {
                self.requirement_status(definition, host) == RequirementStatus::Available
            })
            .cloned()
            .collect()
    }

    /// Open definitions sitting at one of the two "almost" tiers.
    pub fn get_almost_available(&self, host: &dyn CityHost) -> Vec<AlmostAvailable> {
        self.catalog
            .get_all()
            .values()
            .filter(|definition| self.is_open(&definition.contract_id))
            .filter_map(|definition| {
                let status = self.requirement_status(definition, host);
                status.is_almost().then(|| AlmostAvailable {
                    definition: Arc::clone(definition),
                    status,
                })
            })
            .collect()
    }

    pub fn next_action(&self, definition: &ContractDefinition, host: &dyn CityHost) -> Option<String> {
        self.registry.next_action(definition, host)
    }

    pub fn accept(&mut self, contract_id: &str, host: &mut dyn CityHost) -> bool {
        if self.active.contains_key(contract_id) {
            debug!(contract_id, "accept ignored: already active");
            return false;
        }
        if self.completed.contains(contract_id) {
            debug!(contract_id, "accept ignored: already completed");
            return false;
        }
        if !self.can_accept() {
            debug!(contract_id, max_active = self.max_active, "accept ignored: at capacity");
            return false;
        }
        let Some(definition) = self.catalog.get(contract_id).cloned() else {
            debug!(contract_id, "accept ignored: unknown contract");
            return false;
        };
        let status = self.requirement_status(&definition, &*host);
        if status != RequirementStatus::Available {
            debug!(contract_id, ?status, "accept ignored: requirements not met");
            return false;
        }

        let mut state = ContractState::new(Arc::clone(&definition));
        self.registry
            .initialize_all(&mut state, &mut self.listeners, &*host);
        self.active.insert(contract_id.to_string(), state);

        host.credit(definition.advance);
        info!(contract_id, advance = definition.advance, "contract accepted");
        self.record_event(
            ContractEventType::Accepted,
            Some(contract_id),
            Some(definition.advance),
            None,
        );

        // Goals may already hold at signing time.
        self.check_completion(contract_id, host);
        true
    }

    /// Completes the contract when every goal passes. Any unmet goal silently
    /// aborts this round; the next trigger retries.
    pub fn check_completion(&mut self, contract_id: &str, host: &mut dyn CityHost) -> bool {
        let Some(state) = self.active.get(contract_id) else {
            return false;
        };
        if !state.is_active() {
            return false;
        }
        if !self.registry.check_all(state, &*host) {
            return false;
        }
        self.complete(contract_id, host)
    }

    pub fn complete(&mut self, contract_id: &str, host: &mut dyn CityHost) -> bool {
        let Some(mut state) = self.active.remove(contract_id) else {
            debug!(contract_id, "complete ignored: not active");
            return false;
        };
        state.status = ContractStatus::Completed;
        state.dirty = false;
        self.completed.insert(contract_id.to_string());
        self.listeners.release(contract_id);

        let reward = state.definition.reward;
        host.credit(reward);
        info!(contract_id, reward, "contract completed");
        self.record_event(
            ContractEventType::Completed,
            Some(contract_id),
            Some(reward),
            None,
        );

        for observer in &mut self.completion_observers {
            observer(&state);
        }
        true
    }

    /// Advisory affordability gate for [`ContractBook::cancel`].
    pub fn can_cancel(&self, contract_id: &str, host: &dyn CityHost) -> bool {
        self.active
            .get(contract_id)
            .map(|state| host.funds() >= state.definition.cancellation_charge())
            .unwrap_or(false)
    }

    /// Abandons an active contract, debiting advance and fee as one charge.
    /// Affordability is not re-checked here.
    pub fn cancel(&mut self, contract_id: &str, host: &mut dyn CityHost) -> bool {
        let Some(state) = self.active.remove(contract_id) else {
            debug!(contract_id, "cancel ignored: not active");
            return false;
        };
        self.listeners.release(contract_id);

        let charge = state.definition.cancellation_charge();
        host.debit(charge);
        info!(contract_id, charge, "contract cancelled");
        self.record_event(
            ContractEventType::Cancelled,
            Some(contract_id),
            Some(-charge),
            None,
        );

        for observer in &mut self.cancellation_observers {
            observer(&state);
        }
        true
    }

    /// Construction callback: flags subscribed active contracts for the next
    /// daily evaluation. Returns the number of contracts flagged.
    pub fn notify_constructed(&mut self, draft_id: &str) -> usize {
        let subscribers = self
            .listeners
            .subscribers(draft_id)
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut flagged = 0;
        for contract_id in subscribers {
            if let Some(state) = self.active.get_mut(&contract_id) {
                if state.is_active() {
                    state.set_dirty(true);
                    flagged += 1;
                }
            }
        }
        if flagged > 0 {
            debug!(draft_id, flagged, "construction marked contracts dirty");
        }
        flagged
    }

    pub(crate) fn record_event(
        &mut self,
        event_type: ContractEventType,
        contract_id: Option<&str>,
        funds_delta: Option<i64>,
        details: Option<Value>,
    ) {
        let sequence = self.events.len() as u64 + 1;
        self.events.push(ContractEvent {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: self.session_id.clone(),
            day: self.day,
            sequence,
            event_type,
            contract_id: contract_id.map(str::to_string),
            funds_delta,
            details,
        });
    }
}

impl fmt::Debug for ContractBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractBook")
            .field("session_id", &self.session_id)
            .field("max_active", &self.max_active)
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .field("completed", &self.completed)
            .field("listeners", &self.listeners.subscription_count())
            .field("events", &self.events.len())
            .field("day", &self.day)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::CityModel;
    use serde_json::json;
    use std::sync::Mutex;

    fn book(entries: &[Value]) -> ContractBook {
        ContractBook::new(
            &SessionConfig::default(),
            Arc::new(Catalog::from_entries(entries)),
            Arc::new(GoalRegistry::with_default_handlers()),
        )
    }

    fn income_contract(id: &str, threshold: i64) -> Value {
        json!({
            "id": id,
            "type": "contract",
            "advance": 200,
            "reward": 1000,
            "fee": 50,
            "goals": { "income": threshold }
        })
    }

    fn park_contract(id: &str) -> Value {
        json!({
            "id": id,
            "type": "contract",
            "advance": 100,
            "reward": 400,
            "goals": { "buildings": [{ "id": "$park00", "count": 1 }] }
        })
    }

    #[test]
    fn accept_with_met_goal_completes_immediately() {
        let mut book = book(&[income_contract("$income", 1000)]);
        let mut city = CityModel::default();
        city.monthly_income = 1500;

        assert!(book.accept("$income", &mut city));
        assert_eq!(city.funds, 200 + 1000);
        assert!(book.is_completed("$income"));
        assert!(book.get_active().is_empty());
        let kinds = book
            .events()
            .iter()
            .map(|event| event.event_type)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![ContractEventType::Accepted, ContractEventType::Completed]
        );
    }

    #[test]
    fn accept_is_idempotent() {
        let mut book = book(&[income_contract("$income", 1000)]);
        let mut city = CityModel::default();

        assert!(book.accept("$income", &mut city));
        assert!(!book.accept("$income", &mut city));
        assert_eq!(city.funds, 200);
        assert_eq!(book.get_active().len(), 1);
    }

    #[test]
    fn accept_respects_capacity_and_unknown_ids() {
        let mut book = book(&[
            income_contract("$a", 10),
            income_contract("$b", 10),
            income_contract("$c", 10),
        ]);
        let mut city = CityModel::default();

        assert!(book.accept("$a", &mut city));
        assert!(book.accept("$b", &mut city));
        assert!(!book.can_accept());
        assert!(!book.accept("$c", &mut city));
        assert!(!book.accept("$missing", &mut city));
        assert_eq!(book.get_active().len(), 2);
    }

    #[test]
    fn accept_requires_available_status() {
        let mut book = book(&[json!({
            "id": "$ranked",
            "type": "contract",
            "requirements": { "rank": 3 },
            "goals": { "income": 1 }
        })]);
        let mut city = CityModel::default();
        city.rank = 2;
        assert!(!book.accept("$ranked", &mut city));

        city.rank = 3;
        assert!(book.accept("$ranked", &mut city));
    }

    #[test]
    fn completed_contract_is_never_reopened() {
        let mut book = book(&[income_contract("$income", 0)]);
        let mut city = CityModel::default();

        assert!(book.accept("$income", &mut city));
        assert!(book.is_completed("$income"));
        assert!(!book.accept("$income", &mut city));
        assert!(book.get_available(&city).is_empty());
    }

    #[test]
    fn cancel_debits_advance_plus_fee_and_reopens() {
        let mut book = book(&[income_contract("$income", 1_000_000)]);
        let mut city = CityModel::default();
        city.funds = 100;

        assert!(book.accept("$income", &mut city));
        assert_eq!(city.funds, 300);
        assert!(book.can_cancel("$income", &city));

        assert!(book.cancel("$income", &mut city));
        assert_eq!(city.funds, 50);
        assert!(book.get_active().is_empty());
        assert!(!book.is_completed("$income"));
        assert_eq!(book.get_available(&city).len(), 1);

        // Not active anymore: no-op.
        assert!(!book.cancel("$income", &mut city));
        assert_eq!(city.funds, 50);
    }

    #[test]
    fn cancel_does_not_enforce_affordability() {
        let mut book = book(&[income_contract("$income", 1_000_000)]);
        let mut city = CityModel::default();

        assert!(book.accept("$income", &mut city));
        city.funds = 10;
        assert!(!book.can_cancel("$income", &city));
        assert!(book.cancel("$income", &mut city));
        assert_eq!(city.funds, 10 - 250);
    }

    #[test]
    fn extreme_money_values_saturate() {
        let mut book = book(&[json!({
            "id": "$big",
            "type": "contract",
            "advance": i64::MAX,
            "fee": 1,
            "goals": { "income": 1_000_000 }
        })]);
        let mut city = CityModel::default();
        city.funds = 10;

        assert!(book.accept("$big", &mut city));
        assert_eq!(city.funds, i64::MAX);
        assert!(book.can_cancel("$big", &city));

        city.funds = 10;
        assert!(!book.can_cancel("$big", &city));
        assert!(book.cancel("$big", &mut city));
        assert_eq!(city.funds, 10_i64.saturating_sub(i64::MAX));
        assert!(book.get_active().is_empty());
    }

    #[test]
    fn complete_notifies_once() {
        let mut book = book(&[income_contract("$income", 1000)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        book.on_completed(move |state| {
            sink.lock()
                .expect("observer lock")
                .push((state.contract_id().to_string(), state.status()));
        });
        let mut city = CityModel::default();

        assert!(book.accept("$income", &mut city));
        city.monthly_income = 5000;
        assert!(book.check_completion("$income", &mut city));
        assert!(!book.check_completion("$income", &mut city));
        assert!(!book.complete("$income", &mut city));

        assert_eq!(city.funds, 200 + 1000);
        assert_eq!(
            seen.lock().expect("observer lock").as_slice(),
            &[("$income".to_string(), ContractStatus::Completed)]
        );
    }

    #[test]
    fn construction_only_marks_dirty() {
        let mut book = book(&[park_contract("$park")]);
        let mut city = CityModel::default();

        assert!(book.accept("$park", &mut city));
        city.place_draft("$park00", 1);
        assert_eq!(book.notify_constructed("$park00"), 1);

        let state = book.active_state("$park").expect("still active");
        assert!(state.is_dirty());
        assert!(!state.requires_periodic_evaluation());
        assert!(!book.is_completed("$park"));
        assert_eq!(city.funds, 100);
    }

    #[test]
    fn cancellation_releases_listeners_and_notifies() {
        let mut book = book(&[park_contract("$park")]);
        let cancelled = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&cancelled);
        book.on_cancelled(move |_| {
            *counter.lock().expect("observer lock") += 1;
        });
        let mut city = CityModel::default();

        assert!(book.accept("$park", &mut city));
        assert_eq!(book.listeners().subscription_count(), 1);
        assert!(book.cancel("$park", &mut city));
        assert!(book.listeners().is_empty());
        assert_eq!(book.notify_constructed("$park00"), 0);
        assert_eq!(*cancelled.lock().expect("observer lock"), 1);
    }

    #[test]
    fn almost_available_views_carry_tier() {
        let mut book = book(&[
            income_contract("$intro", 0),
            json!({
                "id": "$rank_gate",
                "type": "contract",
                "requirements": { "rank": 1 },
                "goals": { "income": 1 }
            }),
            json!({
                "id": "$chain",
                "type": "contract",
                "requirements": { "contracts": ["$intro"] },
                "goals": { "income": 1 }
            }),
            json!({
                "id": "$far",
                "type": "contract",
                "requirements": { "rank": 5 },
                "goals": { "income": 1 }
            }),
        ]);
        let mut city = CityModel::default();

        let almost = book
            .get_almost_available(&city)
            .into_iter()
            .map(|entry| (entry.definition.contract_id.clone(), entry.status))
            .collect::<Vec<_>>();
        assert_eq!(
            almost,
            vec![
                (
                    "$chain".to_string(),
                    RequirementStatus::AlmostAvailableContracts
                ),
                (
                    "$rank_gate".to_string(),
                    RequirementStatus::AlmostAvailableRank
                ),
            ]
        );

        assert!(book.accept("$intro", &mut city));
        let available = book
            .get_available(&city)
            .into_iter()
            .map(|definition| definition.contract_id.clone())
            .collect::<Vec<_>>();
        assert_eq!(available, vec!["$chain".to_string()]);
    }

    #[test]
    fn store_reflects_active_and_completed() {
        let mut book = book(&[income_contract("$done", 0), park_contract("$park")]);
        let mut city = CityModel::default();
        book.accept("$done", &mut city);
        book.accept("$park", &mut city);

        let store = book.store();
        assert!(store.is_disjoint());
        assert!(store.completed.contains("$done"));
        assert_eq!(
            store.active.get("$park"),
            Some(&ContractRecord {
                contract_id: "$park".to_string(),
                status: ContractStatus::Active,
                requires_periodic_evaluation: false,
            })
        );
    }
}
