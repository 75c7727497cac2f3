//! In-process API facade with command validation, audit log and SQLite persistence.

mod persistence;
mod server;

use std::path::Path;
use std::sync::Arc;

use contract_kernel::{Catalog, CityModel, CitySession, GoalRegistry};
use contracts::goals::MAX_WEALTH_LEVEL;
use contracts::{
    ApiError, Command, CommandPayload, CommandResult, ContractEvent, ContractView, ErrorCode,
    SessionConfig, SessionStatus, SCHEMA_VERSION_V1,
};
use persistence::SqliteSessionStore;
pub use persistence::{
    PersistedCommandEntry, PersistedSession, PersistedSessionSummary, PersistenceError,
};
pub use server::{serve, ServerError};
use tracing::{debug, info, warn};

/// Upper bound for a single `advance_days` command.
pub const MAX_ADVANCE_DAYS: u64 = 3_650;
/// Upper bound for a single `place_draft` command.
pub const MAX_PLACE_COUNT: u32 = 10_000;
/// Database file used when neither the caller nor `CONTRACTS_SQLITE_PATH` names one.
pub const DEFAULT_SQLITE_PATH: &str = "contracts_sessions.sqlite";

pub fn default_sqlite_path() -> String {
    std::env::var("CONTRACTS_SQLITE_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string())
}

#[derive(Debug)]
struct PersistenceState {
    store: SqliteSessionStore,
    persisted_command_count: usize,
    persisted_event_count: usize,
}

#[derive(Debug)]
pub struct ContractApi {
    session: CitySession,
    command_audit: Vec<CommandResult>,
    command_log: Vec<PersistedCommandEntry>,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl ContractApi {
    pub fn from_config(config: SessionConfig, catalog: Arc<Catalog>) -> Self {
        Self::from_session(CitySession::new(config, catalog))
    }

    pub fn from_session(session: CitySession) -> Self {
        Self {
            session,
            command_audit: Vec::new(),
            command_log: Vec::new(),
            persistence: None,
            last_persistence_error: None,
        }
    }

    /// Loads a persisted session from `path` and enters it again: listeners
    /// are re-armed and every active contract is re-checked.
    pub fn resume_from_sqlite(
        path: impl AsRef<Path>,
        session_id: &str,
        catalog: Arc<Catalog>,
        registry: Arc<GoalRegistry>,
    ) -> Result<Self, PersistenceError> {
        let store = SqliteSessionStore::open(path)?;
        let persisted = store.load_session(session_id)?;
        let history = store.load_events(session_id)?;
        let command_log = store.load_commands(session_id)?;

        let persisted_event_count = history.len();
        let persisted_command_count = command_log.len();
        let session = CitySession::resume_with_history(
            persisted.config,
            catalog,
            registry,
            persisted.city,
            persisted.store,
            persisted.day,
            history,
        );
        info!(
            session_id,
            day = persisted.day,
            active = session.status().active_count,
            "session resumed from sqlite"
        );

        let mut api = Self {
            session,
            command_audit: command_log.iter().map(|entry| entry.result.clone()).collect(),
            command_log,
            persistence: Some(PersistenceState {
                store,
                persisted_command_count,
                persisted_event_count,
            }),
            last_persistence_error: None,
        };
        // Session entry may already have completed contracts.
        api.flush_persistence_checked()?;
        Ok(api)
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteSessionStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_command_count: 0,
            persisted_event_count: 0,
        });
        Ok(())
    }

    /// Writes the initial session row and returns whether a persisted session
    /// with the same id was replaced.
    pub fn initialize_session_storage(
        &mut self,
        replace_existing: bool,
    ) -> Result<bool, PersistenceError> {
        let session_id = self.session.session_id().to_string();
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let existed = state.store.session_exists(&session_id)?;
        if existed {
            if !replace_existing {
                return Err(PersistenceError::SessionAlreadyExists(session_id));
            }
            warn!(%session_id, "replacing persisted session");
            state.store.delete_session(&session_id)?;
            state.persisted_command_count = 0;
            state.persisted_event_count = 0;
        }

        self.flush_persistence_checked()?;
        Ok(existed)
    }

    pub fn flush_persistence_checked(&mut self) -> Result<(), PersistenceError> {
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let snapshot = PersistedSession {
            config: self.session.config().clone(),
            store: self.session.store(),
            city: self.session.city().clone(),
            day: self.session.day(),
        };
        let events = self.session.events();
        let new_commands = &self.command_log[state.persisted_command_count..];
        let new_events = &events[state.persisted_event_count.min(events.len())..];

        state
            .store
            .persist_delta(&snapshot, new_commands, new_events)?;

        state.persisted_command_count = self.command_log.len();
        state.persisted_event_count = events.len();
        self.last_persistence_error = None;
        debug!(
            session_id = %snapshot.config.session_id,
            day = snapshot.day,
            "session persisted"
        );
        Ok(())
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn config(&self) -> &SessionConfig {
        self.session.config()
    }

    pub fn session(&self) -> &CitySession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CitySession {
        &mut self.session
    }

    pub fn city(&self) -> &CityModel {
        self.session.city()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn events(&self) -> &[ContractEvent] {
        self.session.events()
    }

    pub fn command_audit(&self) -> &[CommandResult] {
        &self.command_audit
    }

    pub fn command_log(&self) -> &[PersistedCommandEntry] {
        &self.command_log
    }

    pub fn active_contracts(&self) -> Vec<ContractView> {
        self.session.active_views()
    }

    pub fn available_contracts(&self) -> Vec<ContractView> {
        self.session.available_views()
    }

    pub fn almost_available_contracts(&self) -> Vec<ContractView> {
        self.session.almost_available_views()
    }

    pub fn next_action(&self, contract_id: &str) -> Option<String> {
        self.session.next_action(contract_id)
    }

    /// Builds a command id unique within this session's audit log.
    pub fn next_command_id(&self, prefix: &str) -> String {
        format!("{prefix}_{:06}", self.command_log.len() + 1)
    }

    pub fn submit_command(&mut self, command: Command) -> CommandResult {
        let result = match self.validate_command(&command) {
            Some(error) => {
                debug!(
                    command_id = %command.command_id,
                    error_code = ?error.error_code,
                    "command rejected"
                );
                CommandResult::rejected(&command, error)
            }
            None => {
                let applied = self.session.apply(&command.payload);
                CommandResult::accepted(&command, applied)
            }
        };

        self.command_audit.push(result.clone());
        // Commands addressed to another session stay in the audit only.
        if command.session_id == self.session.session_id() {
            self.command_log.push(PersistedCommandEntry {
                command,
                result: result.clone(),
                day: self.session.day(),
            });
        }
        self.flush_persistence_if_enabled();
        result
    }

    fn flush_persistence_if_enabled(&mut self) {
        if self.persistence.is_none() {
            return;
        }

        if let Err(err) = self.flush_persistence_checked() {
            warn!(error = %err, "session persistence failed");
            self.last_persistence_error = Some(err.to_string());
        }
    }

    fn validate_command(&self, command: &Command) -> Option<ApiError> {
        if command.schema_version != SCHEMA_VERSION_V1 {
            return Some(ApiError::new(
                ErrorCode::ContractVersionUnsupported,
                "Unsupported schema_version",
                Some(format!(
                    "got={} expected={}",
                    command.schema_version, SCHEMA_VERSION_V1
                )),
            ));
        }

        if command.session_id != self.session.session_id() {
            return Some(ApiError::new(
                ErrorCode::SessionNotFound,
                "command.session_id does not match this session",
                Some(format!(
                    "got={} expected={}",
                    command.session_id,
                    self.session.session_id()
                )),
            ));
        }

        match &command.payload {
            CommandPayload::AcceptContract { contract_id }
            | CommandPayload::CancelContract { contract_id, .. }
                if self.session.book().catalog().get(contract_id).is_none() =>
            {
                Some(ApiError::new(
                    ErrorCode::UnknownContract,
                    "contract_id is not in the catalog",
                    Some(format!("contract_id={contract_id}")),
                ))
            }
            CommandPayload::CancelContract {
                contract_id,
                force: false,
            } if self.session.book().active_state(contract_id).is_some()
                && !self.session.can_cancel(contract_id) =>
            {
                Some(ApiError::new(
                    ErrorCode::InsufficientFunds,
                    "funds do not cover advance plus cancellation fee",
                    Some(format!("contract_id={contract_id}")),
                ))
            }
            CommandPayload::PlaceDraft { draft_id, .. } if draft_id.trim().is_empty() => Some(
                ApiError::new(ErrorCode::InvalidCommand, "draft_id must not be empty", None),
            ),
            CommandPayload::PlaceDraft { count, .. }
                if *count == 0 || *count > MAX_PLACE_COUNT =>
            {
                Some(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "place_draft count out of range",
                    Some(format!("count={count} max={MAX_PLACE_COUNT}")),
                ))
            }
            CommandPayload::SetPopulation {
                wealth_level: Some(level),
                ..
            } if *level > MAX_WEALTH_LEVEL => Some(ApiError::new(
                ErrorCode::InvalidCommand,
                "wealth_level out of range",
                Some(format!("wealth_level={level} max={MAX_WEALTH_LEVEL}")),
            )),
            CommandPayload::SetHappiness { value, .. }
                if !value.is_finite() || !(0.0..=1.0).contains(value) =>
            {
                Some(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "happiness must be a fraction in [0, 1]",
                    Some(format!("value={value}")),
                ))
            }
            CommandPayload::AdvanceDays { days } if *days == 0 || *days > MAX_ADVANCE_DAYS => {
                Some(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "advance_days requires 1..=max days",
                    Some(format!("days={days} max={MAX_ADVANCE_DAYS}")),
                ))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ContractEventType;
    use serde_json::json;

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_entries(&[
            json!({
                "id": "$park",
                "type": "contract",
                "advance": 200,
                "reward": 600,
                "fee": 50,
                "goals": { "buildings": [{ "id": "$park00", "count": 2 }] }
            }),
            json!({
                "id": "$income",
                "type": "contract",
                "advance": 100,
                "reward": 900,
                "goals": { "income": 800 }
            }),
        ]))
    }

    fn test_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.starting_funds = 300;
        config
    }

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("contracts_api_{name}_{nanos}.sqlite"))
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
    }

    fn command(api: &ContractApi, payload: CommandPayload) -> Command {
        Command::new(api.next_command_id("cmd"), api.session_id(), payload)
    }

    #[test]
    fn rejects_foreign_session_and_version() {
        let mut api = ContractApi::from_config(test_config(), catalog());

        let foreign = Command::new(
            "cmd_foreign",
            "other_city",
            CommandPayload::AdvanceDays { days: 1 },
        );
        let result = api.submit_command(foreign);
        assert!(!result.accepted);
        assert_eq!(
            result.error.map(|error| error.error_code),
            Some(ErrorCode::SessionNotFound)
        );

        let mut stale = command(&api, CommandPayload::AdvanceDays { days: 1 });
        stale.schema_version = "0.9".to_string();
        let result = api.submit_command(stale);
        assert_eq!(
            result.error.map(|error| error.error_code),
            Some(ErrorCode::ContractVersionUnsupported)
        );
        assert_eq!(api.command_audit().len(), 2);
        assert_eq!(api.status().day, 0);
    }

    #[test]
    fn rejects_unknown_contract_and_bad_ranges() {
        let mut api = ContractApi::from_config(test_config(), catalog());

        let cases = [
            CommandPayload::AcceptContract {
                contract_id: "$missing".to_string(),
            },
            CommandPayload::PlaceDraft {
                draft_id: "$park00".to_string(),
                count: 0,
            },
            CommandPayload::SetHappiness {
                category: "parks".to_string(),
                value: 1.5,
            },
            CommandPayload::SetPopulation {
                wealth_level: Some(7),
                count: 10,
            },
            CommandPayload::AdvanceDays { days: 0 },
        ];
        let codes = cases
            .into_iter()
            .map(|payload| {
                let cmd = command(&api, payload);
                api.submit_command(cmd).error.map(|error| error.error_code)
            })
            .collect::<Vec<_>>();

        assert_eq!(
            codes,
            vec![
                Some(ErrorCode::UnknownContract),
                Some(ErrorCode::InvalidCommand),
                Some(ErrorCode::InvalidCommand),
                Some(ErrorCode::InvalidCommand),
                Some(ErrorCode::InvalidCommand),
            ]
        );
    }

    #[test]
    fn disallowed_lifecycle_operation_is_accepted_but_not_applied() {
        let mut api = ContractApi::from_config(test_config(), catalog());
        let accept = command(
            &api,
            CommandPayload::AcceptContract {
                contract_id: "$park".to_string(),
            },
        );
        assert!(api.submit_command(accept).applied);

        let again = command(
            &api,
            CommandPayload::AcceptContract {
                contract_id: "$park".to_string(),
            },
        );
        let result = api.submit_command(again);
        assert!(result.accepted);
        assert!(!result.applied);
        assert_eq!(api.status().funds, 500);
    }

    #[test]
    fn unforced_cancel_requires_funds() {
        let mut api = ContractApi::from_config(test_config(), catalog());
        let accept = command(
            &api,
            CommandPayload::AcceptContract {
                contract_id: "$park".to_string(),
            },
        );
        api.submit_command(accept);
        let broke = command(&api, CommandPayload::SetFunds { amount: 100 });
        api.submit_command(broke);

        let cancel = command(
            &api,
            CommandPayload::CancelContract {
                contract_id: "$park".to_string(),
                force: false,
            },
        );
        let result = api.submit_command(cancel);
        assert_eq!(
            result.error.map(|error| error.error_code),
            Some(ErrorCode::InsufficientFunds)
        );

        let forced = command(
            &api,
            CommandPayload::CancelContract {
                contract_id: "$park".to_string(),
                force: true,
            },
        );
        assert!(api.submit_command(forced).applied);
        assert_eq!(api.status().funds, 100 - 250);
    }

    #[test]
    fn persists_and_resumes_with_rearmed_listeners() {
        let db_path = temp_db_path("resume");
        let session_id = test_config().session_id;

        {
            let mut api = ContractApi::from_config(test_config(), catalog());
            api.attach_sqlite_store(&db_path)
                .expect("should attach sqlite store");
            api.initialize_session_storage(true)
                .expect("should initialize storage");

            for payload in [
                CommandPayload::AcceptContract {
                    contract_id: "$park".to_string(),
                },
                CommandPayload::AcceptContract {
                    contract_id: "$income".to_string(),
                },
                CommandPayload::PlaceDraft {
                    draft_id: "$park00".to_string(),
                    count: 1,
                },
                CommandPayload::AdvanceDays { days: 2 },
            ] {
                let cmd = command(&api, payload);
                assert!(api.submit_command(cmd).accepted);
            }
            assert!(api.last_persistence_error().is_none());
        }

        let mut resumed = ContractApi::resume_from_sqlite(
            &db_path,
            &session_id,
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
        )
        .expect("should resume session");

        assert_eq!(resumed.status().day, 2);
        assert_eq!(resumed.status().active_count, 2);
        assert_eq!(resumed.command_log().len(), 4);
        assert_eq!(
            resumed
                .session()
                .book()
                .listeners()
                .subscribers("$park00")
                .count(),
            1
        );

        let place = command(
            &resumed,
            CommandPayload::PlaceDraft {
                draft_id: "$park00".to_string(),
                count: 1,
            },
        );
        resumed.submit_command(place);
        let advance = command(&resumed, CommandPayload::AdvanceDays { days: 1 });
        resumed.submit_command(advance);
        assert!(resumed.session().book().is_completed("$park"));

        let sequences = resumed
            .events()
            .iter()
            .map(|event| event.sequence)
            .collect::<Vec<_>>();
        let expected = (1..=sequences.len() as u64).collect::<Vec<_>>();
        assert_eq!(sequences, expected);
        assert!(resumed
            .events()
            .iter()
            .any(|event| event.event_type == ContractEventType::Completed));

        cleanup(&db_path);
    }

    #[test]
    fn foreign_commands_stay_out_of_the_persisted_log() {
        let db_path = temp_db_path("foreign");
        let session_id = test_config().session_id;

        {
            let mut api = ContractApi::from_config(test_config(), catalog());
            api.attach_sqlite_store(&db_path).expect("attach");
            api.initialize_session_storage(true).expect("initialize");

            let foreign = Command::new(
                "cmd_000001",
                "other_city",
                CommandPayload::AdvanceDays { days: 1 },
            );
            assert!(!api.submit_command(foreign).accepted);
            let own = command(&api, CommandPayload::SetIncome { amount: 10 });
            assert_eq!(own.command_id, "cmd_000001");
            assert!(api.submit_command(own).accepted);

            assert_eq!(api.command_audit().len(), 2);
            assert_eq!(api.command_log().len(), 1);
            assert!(api.last_persistence_error().is_none());
        }

        let store = SqliteSessionStore::open(&db_path).expect("open store");
        assert!(store.load_commands("other_city").expect("load").is_empty());
        assert_eq!(store.load_commands(&session_id).expect("load").len(), 1);
        drop(store);

        let mut resumed = ContractApi::resume_from_sqlite(
            &db_path,
            &session_id,
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
        )
        .expect("resume");
        assert_eq!(resumed.command_log().len(), 1);

        let next = command(&resumed, CommandPayload::SetIncome { amount: 20 });
        assert_eq!(next.command_id, "cmd_000002");
        assert!(resumed.submit_command(next).accepted);
        assert!(resumed.last_persistence_error().is_none());
        drop(resumed);

        let store = SqliteSessionStore::open(&db_path).expect("reopen store");
        assert_eq!(store.load_commands(&session_id).expect("load").len(), 2);

        cleanup(&db_path);
    }

    #[test]
    fn resume_completes_goals_met_offline() {
        let db_path = temp_db_path("offline");
        let session_id = test_config().session_id;

        {
            let mut api = ContractApi::from_config(test_config(), catalog());
            api.attach_sqlite_store(&db_path).expect("attach");
            api.initialize_session_storage(true).expect("initialize");
            let accept = command(
                &api,
                CommandPayload::AcceptContract {
                    contract_id: "$income".to_string(),
                },
            );
            api.submit_command(accept);
            // Host facts change while the contract system is detached.
            api.session_mut().city_mut().monthly_income = 1_000;
            api.flush_persistence_checked().expect("flush");
        }

        let resumed = ContractApi::resume_from_sqlite(
            &db_path,
            &session_id,
            catalog(),
            Arc::new(GoalRegistry::with_default_handlers()),
        )
        .expect("resume");
        assert!(resumed.session().book().is_completed("$income"));
        assert_eq!(resumed.status().funds, 300 + 100 + 900);

        cleanup(&db_path);
    }
}
