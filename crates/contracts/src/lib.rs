//! v1 cross-boundary types for the contract kernel, API, persistence and CLI.

pub mod goals;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::goals::GoalsSpec;

pub const SCHEMA_VERSION_V1: &str = "1.0";
pub const DEFAULT_MAX_ACTIVE: usize = 2;
/// Raw catalog entries must carry `"type": "contract"` to be loaded.
pub const CONTRACT_KIND_TAG: &str = "contract";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub schema_version: String,
    pub session_id: String,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default)]
    pub starting_funds: i64,
    #[serde(default)]
    pub starting_rank: u32,
    pub notes: Option<String>,
}

fn default_max_active() -> usize {
    DEFAULT_MAX_ACTIVE
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: "city_local_001".to_string(),
            max_active: DEFAULT_MAX_ACTIVE,
            starting_funds: 10_000,
            starting_rank: 0,
            notes: None,
        }
    }
}

/// Availability tier of a contract that is neither active nor completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Available,
    AlmostAvailableRank,
    AlmostAvailableContracts,
    Locked,
}

impl RequirementStatus {
    pub fn is_almost(self) -> bool {
        matches!(
            self,
            Self::AlmostAvailableRank | Self::AlmostAvailableContracts
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementsSpec {
    pub min_rank: Option<u32>,
    #[serde(default)]
    pub contracts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractDefinition {
    pub contract_id: String,
    pub title: String,
    pub description: String,
    pub advance: i64,
    pub reward: i64,
    pub fee: i64,
    pub requirements: Option<RequirementsSpec>,
    pub goals: GoalsSpec,
}

impl ContractDefinition {
    /// Amount debited on cancellation: the advance is paid back together with the fee.
    pub fn cancellation_charge(&self) -> i64 {
        self.advance.saturating_add(self.fee)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Completed,
}

/// Persisted form of an active contract. Transient flags are not part of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractRecord {
    pub contract_id: String,
    pub status: ContractStatus,
    #[serde(default)]
    pub requires_periodic_evaluation: bool,
}

/// The two collections that survive a session reload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStore {
    #[serde(default)]
    pub active: BTreeMap<String, ContractRecord>,
    #[serde(default)]
    pub completed: BTreeSet<String>,
}

impl SessionStore {
    pub fn is_disjoint(&self) -> bool {
        self.active
            .keys()
            .all(|contract_id| !self.completed.contains(contract_id))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractEventType {
    Accepted,
    Completed,
    Cancelled,
    DraftConstructed,
    DayAdvanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractEvent {
    pub schema_version: String,
    pub session_id: String,
    pub day: u64,
    pub sequence: u64,
    pub event_type: ContractEventType,
    pub contract_id: Option<String>,
    /// Signed change applied to the city funds by this event, if any.
    pub funds_delta: Option<i64>,
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    AcceptContract {
        contract_id: String,
    },
    CancelContract {
        contract_id: String,
        #[serde(default)]
        force: bool,
    },
    PlaceDraft {
        draft_id: String,
        #[serde(default = "default_place_count")]
        count: u32,
    },
    SetPopulation {
        wealth_level: Option<u8>,
        count: u64,
    },
    SetHappiness {
        category: String,
        value: f64,
    },
    SetIncome {
        amount: i64,
    },
    SetRank {
        rank: u32,
    },
    SetFunds {
        amount: i64,
    },
    AdvanceDays {
        days: u64,
    },
}

fn default_place_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub schema_version: String,
    pub command_id: String,
    pub session_id: String,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(
        command_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: CommandPayload,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command_id.into(),
            session_id: session_id.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    InvalidCommand,
    UnknownContract,
    ContractVersionUnsupported,
    InsufficientFunds,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub schema_version: String,
    pub command_id: String,
    pub session_id: String,
    pub accepted: bool,
    /// Whether the command changed any state. Disallowed lifecycle operations
    /// are accepted but not applied.
    pub applied: bool,
    pub error: Option<ApiError>,
}

impl CommandResult {
    pub fn accepted(command: &Command, applied: bool) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command.command_id.clone(),
            session_id: command.session_id.clone(),
            accepted: true,
            applied,
            error: None,
        }
    }

    pub fn rejected(command: &Command, error: ApiError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command.command_id.clone(),
            session_id: command.session_id.clone(),
            accepted: false,
            applied: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub schema_version: String,
    pub session_id: String,
    pub day: u64,
    pub funds: i64,
    pub rank: u32,
    pub active_count: usize,
    pub max_active: usize,
    pub completed_count: usize,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session_id={} day={} funds={} rank={} active={}/{} completed={}",
            self.session_id,
            self.day,
            self.funds,
            self.rank,
            self.active_count,
            self.max_active,
            self.completed_count
        )
    }
}

/// Presentation-facing view of one contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractView {
    pub contract_id: String,
    pub title: String,
    pub description: String,
    pub advance: i64,
    pub reward: i64,
    pub fee: i64,
    pub availability: Option<RequirementStatus>,
    pub next_action: Option<String>,
    pub can_cancel: Option<bool>,
}

impl ContractView {
    pub fn from_definition(definition: &ContractDefinition) -> Self {
        Self {
            contract_id: definition.contract_id.clone(),
            title: definition.title.clone(),
            description: definition.description.clone(),
            advance: definition.advance,
            reward: definition.reward,
            fee: definition.fee,
            availability: None,
            next_action: None,
            can_cancel: None,
        }
    }
}
