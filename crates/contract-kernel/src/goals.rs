//! Goal handler registry.
//!
//! Each goal kind is a self-contained [`GoalHandler`] with an `initialize`
//! step (subscribe to construction events or flag the contract for daily
//! polling) and a `check` step (read the host's current state). New kinds are
//! added with [`GoalRegistry::register`]; the lifecycle code never matches on
//! goal kinds itself.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use contracts::goals::{
    DraftGoal, GoalParams, GOAL_BUILDINGS, GOAL_HAPPINESS, GOAL_INCOME, GOAL_POPULATION,
    GOAL_ROADS,
};
use contracts::ContractDefinition;
use tracing::warn;

use crate::host::CityHost;
use crate::lifecycle::ContractState;
use crate::listeners::ListenerTable;

/// Mutable view handed to [`GoalHandler::initialize`].
pub struct GoalSetup<'a> {
    state: &'a mut ContractState,
    listeners: &'a mut ListenerTable,
    host: &'a dyn CityHost,
}

impl<'a> GoalSetup<'a> {
    pub(crate) fn new(
        state: &'a mut ContractState,
        listeners: &'a mut ListenerTable,
        host: &'a dyn CityHost,
    ) -> Self {
        Self {
            state,
            listeners,
            host,
        }
    }

    pub fn contract_id(&self) -> &str {
        self.state.contract_id()
    }

    pub fn host(&self) -> &dyn CityHost {
        self.host
    }

    /// Subscribes the contract to "instance of draft added" notifications.
    /// The notification only marks the contract dirty.
    pub fn subscribe_constructed(&mut self, draft_id: &str) {
        match self.host.resolve_draft(draft_id) {
            Some(resolved) => self.listeners.subscribe(&resolved, self.state.contract_id()),
            None => warn!(
                contract_id = %self.state.contract_id(),
                draft_id,
                "goal references unknown draft, no subscription registered"
            ),
        }
    }

    /// Marks the contract for re-evaluation on every daily tick.
    pub fn require_periodic_evaluation(&mut self) {
        self.state.set_requires_periodic_evaluation(true);
    }
}

pub trait GoalHandler: Send + Sync {
    fn initialize(&self, setup: &mut GoalSetup<'_>, params: &GoalParams);

    fn check(&self, state: &ContractState, params: &GoalParams, host: &dyn CityHost) -> bool;
}

pub struct GoalRegistry {
    handlers: BTreeMap<String, Box<dyn GoalHandler>>,
}

impl GoalRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_default_handlers() -> Self {
        let mut registry = Self::empty();
        registry.register(GOAL_BUILDINGS, DraftGoalHandler);
        registry.register(GOAL_ROADS, DraftGoalHandler);
        registry.register(GOAL_POPULATION, PopulationGoalHandler);
        registry.register(GOAL_HAPPINESS, HappinessGoalHandler);
        registry.register(GOAL_INCOME, IncomeGoalHandler);
        registry
    }

    /// Adds a goal kind, replacing any handler already registered under it.
    pub fn register(&mut self, kind: impl Into<String>, handler: impl GoalHandler + 'static) {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    pub fn handler(&self, kind: &str) -> Option<&dyn GoalHandler> {
        self.handlers.get(kind).map(Box::as_ref)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs every goal kind's `initialize` for a contract.
    pub(crate) fn initialize_all(
        &self,
        state: &mut ContractState,
        listeners: &mut ListenerTable,
        host: &dyn CityHost,
    ) {
        let definition = Arc::clone(state.definition());
        let mut setup = GoalSetup::new(state, listeners, host);
        for (kind, params) in &definition.goals {
            match self.handler(kind) {
                Some(handler) => handler.initialize(&mut setup, params),
                None => warn!(
                    contract_id = %definition.contract_id,
                    goal_kind = %kind,
                    "no handler registered for goal kind"
                ),
            }
        }
    }

    /// True when every goal kind in the definition passes.
    pub fn check_all(&self, state: &ContractState, host: &dyn CityHost) -> bool {
        state.definition().goals.iter().all(|(kind, params)| {
            match self.handler(kind) {
                Some(handler) => handler.check(state, params, host),
                None => {
                    warn!(
                        contract_id = %state.contract_id(),
                        goal_kind = %kind,
                        "no handler registered for goal kind, goal cannot pass"
                    );
                    false
                }
            }
        })
    }

    /// First building or road draft still short of its target, in declaration
    /// order. Non-actionable goals are ignored.
    pub fn next_action(
        &self,
        definition: &ContractDefinition,
        host: &dyn CityHost,
    ) -> Option<String> {
        [GOAL_BUILDINGS, GOAL_ROADS]
            .into_iter()
            .filter_map(|kind| match definition.goals.get(kind) {
                Some(GoalParams::Drafts(goals)) => Some(goals),
                _ => None,
            })
            .flatten()
            .find(|goal| !draft_goal_met(goal, host))
            .map(|goal| goal.draft_id.clone())
    }
}

impl Default for GoalRegistry {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl fmt::Debug for GoalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Scales a happiness fraction to a 0..=100 integer as `ceil(value * 100 - 0.5)`.
///
/// Both the measured fraction and the target go through this before comparing.
pub fn happiness_percent(fraction: f64) -> i64 {
    (fraction * 100.0 - 0.5).ceil() as i64
}

fn draft_goal_met(goal: &DraftGoal, host: &dyn CityHost) -> bool {
    let built = host
        .resolve_draft(&goal.draft_id)
        .map(|resolved| host.draft_count(&resolved))
        .unwrap_or(0);
    built >= u64::from(goal.count)
}

fn mismatched(state: &ContractState, expected: &str) -> bool {
    warn!(
        contract_id = %state.contract_id(),
        expected,
        "goal parameters do not match handler"
    );
    false
}

/// `buildings` and `roads`: event-driven through construction subscriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DraftGoalHandler;

impl GoalHandler for DraftGoalHandler {
    fn initialize(&self, setup: &mut GoalSetup<'_>, params: &GoalParams) {
        if let GoalParams::Drafts(goals) = params {
            for goal in goals {
                setup.subscribe_constructed(&goal.draft_id);
            }
        }
    }

    fn check(&self, state: &ContractState, params: &GoalParams, host: &dyn CityHost) -> bool {
        match params {
            GoalParams::Drafts(goals) => goals.iter().all(|goal| draft_goal_met(goal, host)),
            _ => mismatched(state, "drafts"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PopulationGoalHandler;

impl GoalHandler for PopulationGoalHandler {
    fn initialize(&self, setup: &mut GoalSetup<'_>, _params: &GoalParams) {
        setup.require_periodic_evaluation();
    }

    fn check(&self, state: &ContractState, params: &GoalParams, host: &dyn CityHost) -> bool {
        match params {
            GoalParams::Population(goals) => goals
                .iter()
                .all(|goal| host.population(goal.wealth_level) >= goal.count),
            _ => mismatched(state, "population"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HappinessGoalHandler;

impl GoalHandler for HappinessGoalHandler {
    fn initialize(&self, setup: &mut GoalSetup<'_>, _params: &GoalParams) {
        setup.require_periodic_evaluation();
    }

    fn check(&self, state: &ContractState, params: &GoalParams, host: &dyn CityHost) -> bool {
        match params {
            GoalParams::Happiness(goals) => goals.iter().all(|goal| {
                happiness_percent(host.happiness(&goal.category))
                    >= happiness_percent(goal.target)
            }),
            _ => mismatched(state, "happiness"),
        }
    }
}

/// Single threshold on combined monthly income.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncomeGoalHandler;

impl GoalHandler for IncomeGoalHandler {
    fn initialize(&self, setup: &mut GoalSetup<'_>, _params: &GoalParams) {
        setup.require_periodic_evaluation();
    }

    fn check(&self, state: &ContractState, params: &GoalParams, host: &dyn CityHost) -> bool {
        match params {
            GoalParams::Threshold(threshold) => host.monthly_income() >= *threshold,
            _ => mismatched(state, "threshold"),
        }
    }
}
