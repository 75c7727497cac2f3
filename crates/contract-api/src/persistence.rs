use std::path::Path;

use contract_kernel::CityModel;
use contracts::{Command, CommandResult, ContractEvent, SessionConfig, SessionStore};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCommandEntry {
    pub command: Command,
    pub result: CommandResult,
    pub day: u64,
}

/// Everything needed to resume a session; listeners and dirty flags are
/// rebuilt by session entry.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub config: SessionConfig,
    pub store: SessionStore,
    pub city: CityModel,
    pub day: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSessionSummary {
    pub session_id: String,
    pub day: u64,
    pub active_count: usize,
    pub completed_count: usize,
    pub updated_at: String,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite store is not attached")]
    NotAttached,
    #[error("session {0} is not persisted")]
    SessionNotFound(String),
    #[error("session {0} is already persisted")]
    SessionAlreadyExists(String),
}

#[derive(Debug)]
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn persist_delta(
        &mut self,
        session: &PersistedSession,
        commands: &[PersistedCommandEntry],
        events: &[ContractEvent],
    ) -> Result<(), PersistenceError> {
        let session_id = session.config.session_id.as_str();
        let tx = self.conn.transaction()?;

        upsert_session(&tx, session)?;

        for entry in commands {
            let command_json = serde_json::to_string(&entry.command)?;
            let result_json = serde_json::to_string(&entry.result)?;
            tx.execute(
                "INSERT OR IGNORE INTO commands (
                    session_id,
                    command_id,
                    day,
                    accepted,
                    command_json,
                    result_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    entry.command.command_id.as_str(),
                    i64::try_from(entry.day).unwrap_or(i64::MAX),
                    if entry.result.accepted { 1_i64 } else { 0_i64 },
                    command_json,
                    result_json,
                    day_stamp(entry.day),
                ],
            )?;
        }

        for event in events {
            let payload_json = serde_json::to_string(event)?;
            tx.execute(
                "INSERT OR IGNORE INTO events (
                    session_id,
                    sequence,
                    day,
                    event_type,
                    contract_id,
                    payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    i64::try_from(event.sequence).unwrap_or(i64::MAX),
                    i64::try_from(event.day).unwrap_or(i64::MAX),
                    format!("{:?}", event.event_type),
                    event.contract_id.as_deref(),
                    payload_json,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn session_exists(&self, session_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_session(&mut self, session_id: &str) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM events WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM commands WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<PersistedSession, PersistenceError> {
        let row: Option<(String, String, String, i64)> = self
            .conn
            .query_row(
                "SELECT config_json, store_json, city_json, day
                 FROM sessions
                 WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((config_json, store_json, city_json, day)) = row else {
            return Err(PersistenceError::SessionNotFound(session_id.to_string()));
        };

        Ok(PersistedSession {
            config: serde_json::from_str(&config_json)?,
            store: serde_json::from_str(&store_json)?,
            city: serde_json::from_str(&city_json)?,
            day: u64::try_from(day).unwrap_or(0),
        })
    }

    pub fn load_events(&self, session_id: &str) -> Result<Vec<ContractEvent>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json
             FROM events
             WHERE session_id = ?1
             ORDER BY sequence ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<ContractEvent>(&payload)?);
        }

        Ok(events)
    }

    pub fn load_commands(
        &self,
        session_id: &str,
    ) -> Result<Vec<PersistedCommandEntry>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT command_json, result_json, day
             FROM commands
             WHERE session_id = ?1
             ORDER BY rowid ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut commands = Vec::new();
        for row in rows {
            let (command_json, result_json, day) = row?;
            commands.push(PersistedCommandEntry {
                command: serde_json::from_str(&command_json)?,
                result: serde_json::from_str(&result_json)?,
                day: u64::try_from(day).unwrap_or(0),
            });
        }

        Ok(commands)
    }

    pub fn list_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<PersistedSessionSummary>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, day, store_json, updated_at
             FROM sessions
             ORDER BY session_id ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (session_id, day, store_json, updated_at) = row?;
            let store: SessionStore = serde_json::from_str(&store_json)?;
            sessions.push(PersistedSessionSummary {
                session_id,
                day: u64::try_from(day).unwrap_or(0),
                active_count: store.active.len(),
                completed_count: store.completed.len(),
                updated_at,
            });
        }

        Ok(sessions)
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                config_json TEXT NOT NULL,
                store_json TEXT NOT NULL,
                city_json TEXT NOT NULL,
                day INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS commands (
                session_id TEXT NOT NULL,
                command_id TEXT NOT NULL,
                day INTEGER NOT NULL,
                accepted INTEGER NOT NULL,
                command_json TEXT NOT NULL,
                result_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, command_id)
            );

            CREATE TABLE IF NOT EXISTS events (
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                day INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                contract_id TEXT,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (session_id, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_events_session_day ON events(session_id, day);
            CREATE INDEX IF NOT EXISTS idx_events_session_contract ON events(session_id, contract_id);
            CREATE INDEX IF NOT EXISTS idx_commands_session_day ON commands(session_id, day);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', 'day-000000')",
            [],
        )?;

        Ok(())
    }
}

fn upsert_session(
    tx: &rusqlite::Transaction<'_>,
    session: &PersistedSession,
) -> Result<(), PersistenceError> {
    let config_json = serde_json::to_string(&session.config)?;
    let store_json = serde_json::to_string(&session.store)?;
    let city_json = serde_json::to_string(&session.city)?;

    tx.execute(
        "INSERT INTO sessions (
            session_id,
            schema_version,
            config_json,
            store_json,
            city_json,
            day,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(session_id) DO UPDATE SET
            schema_version = excluded.schema_version,
            config_json = excluded.config_json,
            store_json = excluded.store_json,
            city_json = excluded.city_json,
            day = excluded.day,
            updated_at = excluded.updated_at",
        params![
            session.config.session_id.as_str(),
            session.config.schema_version.as_str(),
            config_json,
            store_json,
            city_json,
            i64::try_from(session.day).unwrap_or(i64::MAX),
            day_stamp(0),
            day_stamp(session.day),
        ],
    )?;

    Ok(())
}

fn day_stamp(day: u64) -> String {
    format!("day-{day:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractRecord, ContractStatus};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("contracts_store_{name}_{nanos}.sqlite"))
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
    }

    #[test]
    fn session_round_trips_without_transient_state() {
        let path = temp_db_path("round_trip");
        let mut store = SqliteSessionStore::open(&path).expect("open store");

        let mut persisted = SessionStore::default();
        persisted.active.insert(
            "$park".to_string(),
            ContractRecord {
                contract_id: "$park".to_string(),
                status: ContractStatus::Active,
                requires_periodic_evaluation: true,
            },
        );
        persisted.completed.insert("$intro".to_string());

        let mut city = CityModel::default();
        city.place_draft("$park00", 1);
        let session = PersistedSession {
            config: SessionConfig::default(),
            store: persisted.clone(),
            city: city.clone(),
            day: 12,
        };
        store.persist_delta(&session, &[], &[]).expect("persist");

        let loaded = store
            .load_session(&session.config.session_id)
            .expect("load session");
        assert_eq!(loaded.store, persisted);
        assert_eq!(loaded.city, city);
        assert_eq!(loaded.day, 12);

        let summaries = store.list_sessions(10).expect("list sessions");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].active_count, 1);
        assert_eq!(summaries[0].updated_at, "day-000012");

        cleanup(&path);
    }

    #[test]
    fn missing_session_is_reported() {
        let path = temp_db_path("missing");
        let store = SqliteSessionStore::open(&path).expect("open store");

        assert!(!store.session_exists("nope").expect("exists query"));
        assert!(matches!(
            store.load_session("nope"),
            Err(PersistenceError::SessionNotFound(id)) if id == "nope"
        ));

        cleanup(&path);
    }
}
