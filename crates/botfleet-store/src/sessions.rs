use rusqlite::OptionalExtension;
use tracing::instrument;

use botfleet_core::store::SessionStore;
use botfleet_core::{PersistenceError, SessionId, SessionRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "sessions";
const COLUMNS: &str = "id, display_name, target_host, target_port, username, protocol_version, auth_key,
                       status, created_at, last_connected_at, connection_count";

/// SQLite-backed session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or fully replace a record.
    #[instrument(skip(self, record), fields(session_id = %record.id, status = %record.status))]
    pub fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, display_name, target_host, target_port, username, protocol_version,
                                       auth_key, status, created_at, last_connected_at, connection_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    target_host = excluded.target_host,
                    target_port = excluded.target_port,
                    username = excluded.username,
                    protocol_version = excluded.protocol_version,
                    auth_key = excluded.auth_key,
                    status = excluded.status,
                    last_connected_at = excluded.last_connected_at,
                    connection_count = excluded.connection_count",
                rusqlite::params![
                    record.id.as_str(),
                    record.display_name,
                    record.target_host,
                    record.target_port,
                    record.username,
                    record.protocol_version,
                    record.auth_key,
                    record.status.as_str(),
                    row_helpers::format_time(&record.created_at),
                    record.last_connected_at.as_ref().map(row_helpers::format_time),
                    record.connection_count as i64,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRecord, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1");
            conn.query_row(&sql, [id.as_str()], |row| Ok(row_to_record(row)))
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?
        })
    }

    /// All records, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM sessions ORDER BY created_at ASC, id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            Ok(out)
        })
    }

    /// Returns whether a record was removed.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            Ok(n > 0)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<SessionRecord, StoreError> {
    let status: String = row_helpers::get(row, 7, TABLE, "status")?;
    let created_at: String = row_helpers::get(row, 8, TABLE, "created_at")?;
    let last_connected_at: Option<String> = row_helpers::get(row, 9, TABLE, "last_connected_at")?;
    let connection_count: i64 = row_helpers::get(row, 10, TABLE, "connection_count")?;

    Ok(SessionRecord {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
        display_name: row_helpers::get(row, 1, TABLE, "display_name")?,
        target_host: row_helpers::get(row, 2, TABLE, "target_host")?,
        target_port: row_helpers::get(row, 3, TABLE, "target_port")?,
        username: row_helpers::get(row, 4, TABLE, "username")?,
        protocol_version: row_helpers::get(row, 5, TABLE, "protocol_version")?,
        auth_key: row_helpers::get(row, 6, TABLE, "auth_key")?,
        status: row_helpers::parse_enum(&status, TABLE, "status")?,
        created_at: row_helpers::parse_time(&created_at, TABLE, "created_at")?,
        last_connected_at: last_connected_at
            .map(|t| row_helpers::parse_time(&t, TABLE, "last_connected_at"))
            .transpose()?,
        connection_count: u64::try_from(connection_count).map_err(|_| StoreError::CorruptRow {
            table: TABLE,
            column: "connection_count",
            detail: format!("negative count {connection_count}"),
        })?,
    })
}

impl SessionStore for SessionRepo {
    fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        Ok(self.upsert(record)?)
    }

    fn remove(&self, id: &SessionId) -> Result<(), PersistenceError> {
        self.delete(id)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SessionRecord>, PersistenceError> {
        Ok(self.list()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_core::status::SessionConfig;
    use botfleet_core::SessionStatus;
    use chrono::{Duration, Utc};

    fn setup() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    fn record(name: &str) -> SessionRecord {
        SessionConfig::new(name, "mc.example.net", 25565)
            .into_record(SessionId::new(), Utc::now())
            .unwrap()
    }

    #[test]
    fn upsert_and_get() {
        let repo = setup();
        let mut rec = record("Bot1");
        rec.protocol_version = Some("1.20.4".into());
        repo.upsert(&rec).unwrap();
        assert_eq!(repo.get(&rec.id).unwrap(), rec);
    }

    #[test]
    fn upsert_updates_mutable_fields() {
        let repo = setup();
        let mut rec = record("Bot1");
        repo.upsert(&rec).unwrap();

        rec.status = SessionStatus::Connected;
        rec.connection_count = 2;
        rec.last_connected_at = Some(Utc::now());
        repo.upsert(&rec).unwrap();

        let got = repo.get(&rec.id).unwrap();
        assert_eq!(got.status, SessionStatus::Connected);
        assert_eq!(got.connection_count, 2);
        assert_eq!(got.last_connected_at, rec.last_connected_at);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = setup();
        assert!(matches!(repo.get(&SessionId::new()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_is_oldest_first() {
        let repo = setup();
        let mut older = record("A");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = record("B");
        repo.upsert(&newer).unwrap();
        repo.upsert(&older).unwrap();

        let names: Vec<_> = repo.list().unwrap().into_iter().map(|r| r.display_name).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn delete_reports_presence() {
        let repo = setup();
        let rec = record("Bot1");
        repo.upsert(&rec).unwrap();
        assert!(repo.delete(&rec.id).unwrap());
        assert!(!repo.delete(&rec.id).unwrap());
        assert!(repo.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_status_is_reported() {
        let repo = setup();
        let rec = record("Bot1");
        repo.upsert(&rec).unwrap();
        repo.db
            .with_conn(|conn| {
                conn.execute("UPDATE sessions SET status = 'sleeping'", [])?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(repo.list(), Err(StoreError::CorruptRow { column: "status", .. })));
    }

    #[test]
    fn implements_session_store() {
        let repo = setup();
        let store: &dyn SessionStore = &repo;
        let rec = record("Bot1");
        store.save(&rec).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![rec.clone()]);
        store.remove(&rec.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
