//! City session: the in-memory host, the contract book and the day clock.

use std::sync::Arc;

use contracts::{
    CommandPayload, ContractEvent, ContractEventType, ContractView, SessionConfig, SessionStatus,
    SessionStore, SCHEMA_VERSION_V1,
};
use serde_json::json;
use tracing::debug;

use crate::catalog::Catalog;
use crate::city::CityModel;
use crate::goals::GoalRegistry;
use crate::host::CityHost;
use crate::lifecycle::{ContractBook, ContractState};

#[derive(Debug)]
pub struct CitySession {
    config: SessionConfig,
    city: CityModel,
    book: ContractBook,
}

impl CitySession {
    pub fn new(config: SessionConfig, catalog: Arc<Catalog>) -> Self {
        let city = CityModel::from_config(&config);
        Self::with_city(config, catalog, Arc::new(GoalRegistry::default()), city)
    }

    pub fn with_city(
        config: SessionConfig,
        catalog: Arc<Catalog>,
        registry: Arc<GoalRegistry>,
        city: CityModel,
    ) -> Self {
        let book = ContractBook::new(&config, catalog, registry);
        Self { config, city, book }
    }

    /// Reloads a persisted session and runs session entry on it.
    pub fn resume(
        config: SessionConfig,
        catalog: Arc<Catalog>,
        registry: Arc<GoalRegistry>,
        city: CityModel,
        store: SessionStore,
        day: u64,
    ) -> Self {
        Self::resume_with_history(config, catalog, registry, city, store, day, Vec::new())
    }

    pub fn resume_with_history(
        config: SessionConfig,
        catalog: Arc<Catalog>,
        registry: Arc<GoalRegistry>,
        mut city: CityModel,
        store: SessionStore,
        day: u64,
        history: Vec<ContractEvent>,
    ) -> Self {
        let book = ContractBook::restore_with_history(
            &config, catalog, registry, store, history, day, &mut city,
        );
        Self { config, city, book }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn day(&self) -> u64 {
        self.book.day()
    }

    pub fn city(&self) -> &CityModel {
        &self.city
    }

    /// Direct host access. Changes made here reach contracts only through the
    /// daily pass or the next session entry.
    pub fn city_mut(&mut self) -> &mut CityModel {
        &mut self.city
    }

    pub fn book(&self) -> &ContractBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut ContractBook {
        &mut self.book
    }

    pub fn events(&self) -> &[ContractEvent] {
        self.book.events()
    }

    pub fn store(&self) -> SessionStore {
        self.book.store()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: self.config.session_id.clone(),
            day: self.book.day(),
            funds: self.city.funds(),
            rank: self.city.rank(),
            active_count: self.book.get_active().len(),
            max_active: self.book.max_active(),
            completed_count: self.book.completed().len(),
        }
    }

    pub fn accept(&mut self, contract_id: &str) -> bool {
        self.book.accept(contract_id, &mut self.city)
    }

    pub fn can_cancel(&self, contract_id: &str) -> bool {
        self.book.can_cancel(contract_id, &self.city)
    }

    /// Cancels an active contract. Unless `force` is set the affordability
    /// gate must pass first.
    pub fn cancel(&mut self, contract_id: &str, force: bool) -> bool {
        if !force && !self.can_cancel(contract_id) {
            debug!(contract_id, "cancel refused: cannot afford cancellation");
            return false;
        }
        self.book.cancel(contract_id, &mut self.city)
    }

    /// Records new instances of a draft and fires one construction
    /// notification for the whole batch.
    pub fn place_draft(&mut self, draft_id: &str, count: u32) -> u64 {
        let total = self.city.place_draft(draft_id, count);
        if count == 0 {
            return total;
        }
        let resolved = self
            .city
            .resolve_draft(draft_id)
            .unwrap_or_else(|| draft_id.to_string());

        // Repeat notifications only re-set the dirty flag.
        let flagged = self.book.notify_constructed(&resolved);
        self.book.record_event(
            ContractEventType::DraftConstructed,
            None,
            None,
            Some(json!({
                "draft_id": draft_id,
                "count": count,
                "total": total,
                "flagged_contracts": flagged,
            })),
        );
        total
    }

    /// Advances the clock, running the daily pass once per day. Returns the
    /// ids of contracts completed along the way.
    pub fn advance_days(&mut self, days: u64) -> Vec<String> {
        let mut completed = Vec::new();
        for _ in 0..days {
            let day = self.book.day() + 1;
            completed.extend(self.book.on_new_day(day, &mut self.city));
        }
        completed
    }

    /// Re-runs session entry against the current host state.
    pub fn reenter(&mut self) -> usize {
        self.book.enter_session(&mut self.city)
    }

    /// Applies one command. Returns whether any state changed.
    pub fn apply(&mut self, payload: &CommandPayload) -> bool {
        match payload {
            CommandPayload::AcceptContract { contract_id } => self.accept(contract_id),
            CommandPayload::CancelContract { contract_id, force } => {
                self.cancel(contract_id, *force)
            }
            CommandPayload::PlaceDraft { draft_id, count } => {
                self.place_draft(draft_id, *count);
                *count > 0
            }
            CommandPayload::SetPopulation {
                wealth_level,
                count,
            } => {
                self.city.set_population(*wealth_level, *count);
                true
            }
            CommandPayload::SetHappiness { category, value } => {
                self.city.set_happiness(category, *value);
                true
            }
            CommandPayload::SetIncome { amount } => {
                self.city.monthly_income = *amount;
                true
            }
            CommandPayload::SetRank { rank } => {
                self.city.rank = *rank;
                true
            }
            CommandPayload::SetFunds { amount } => {
                self.city.funds = *amount;
                true
            }
            CommandPayload::AdvanceDays { days } => {
                self.advance_days(*days);
                *days > 0
            }
        }
    }

    pub fn active_views(&self) -> Vec<ContractView> {
        self.book
            .get_active()
            .into_iter()
            .map(|state| self.active_view(state))
            .collect()
    }

    pub fn active_view(&self, state: &ContractState) -> ContractView {
        let mut view = ContractView::from_definition(state.definition());
        view.next_action = self.book.next_action(state.definition(), &self.city);
        view.can_cancel = Some(self.book.can_cancel(state.contract_id(), &self.city));
        view
    }

    pub fn available_views(&self) -> Vec<ContractView> {
        self.book
            .get_available(&self.city)
            .iter()
            .map(|definition| {
                let mut view = ContractView::from_definition(definition);
                view.availability = Some(contracts::RequirementStatus::Available);
                view
            })
            .collect()
    }

    pub fn almost_available_views(&self) -> Vec<ContractView> {
        self.book
            .get_almost_available(&self.city)
            .iter()
            .map(|entry| {
                let mut view = ContractView::from_definition(&entry.definition);
                view.availability = Some(entry.status);
                view
            })
            .collect()
    }

    pub fn next_action(&self, contract_id: &str) -> Option<String> {
        let definition = self.book.catalog().get(contract_id)?;
        self.book.next_action(definition, &self.city)
    }
}
