use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "server_history";

/// Most-recently-used target servers. Older entries past this cap are evicted.
pub const HISTORY_CAP: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHistoryEntry {
    pub key: String,
    pub host: String,
    pub port: u16,
    pub version: Option<String>,
    pub username: Option<String>,
    pub last_used: DateTime<Utc>,
    pub use_count: u64,
}

pub fn history_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

#[derive(Clone)]
pub struct ServerHistoryRepo {
    db: Database,
}

impl ServerHistoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a use of `host:port`, moving it to the front of the history.
    #[instrument(skip(self))]
    pub fn record(
        &self,
        host: &str,
        port: u16,
        version: Option<&str>,
        username: Option<&str>,
    ) -> Result<ServerHistoryEntry, StoreError> {
        let key = history_key(host, port);
        let now = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO server_history (key, host, port, version, username, last_used, use_count, touched)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, (SELECT COALESCE(MAX(touched), 0) + 1 FROM server_history))
                 ON CONFLICT(key) DO UPDATE SET
                    version = COALESCE(excluded.version, server_history.version),
                    username = COALESCE(excluded.username, server_history.username),
                    last_used = excluded.last_used,
                    use_count = server_history.use_count + 1,
                    touched = excluded.touched",
                rusqlite::params![key, host, port, version, username, row_helpers::format_time(&now)],
            )?;
            let evicted = conn.execute(
                "DELETE FROM server_history WHERE key NOT IN
                    (SELECT key FROM server_history ORDER BY touched DESC LIMIT ?1)",
                [HISTORY_CAP as i64],
            )?;
            if evicted > 0 {
                debug!(evicted, "server history trimmed");
            }
            Ok(())
        })?;
        self.get(&key)
    }

    pub fn get(&self, key: &str) -> Result<ServerHistoryEntry, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, host, port, version, username, last_used, use_count
                 FROM server_history WHERE key = ?1",
            )?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => row_to_entry(row),
                None => Err(StoreError::NotFound(format!("server {key}"))),
            }
        })
    }

    /// Most recent first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<ServerHistoryEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, host, port, version, username, last_used, use_count
                 FROM server_history ORDER BY touched DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
    }

    /// Returns whether an entry was removed.
    #[instrument(skip(self))]
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM server_history WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<ServerHistoryEntry, StoreError> {
    let last_used: String = row_helpers::get(row, 5, TABLE, "last_used")?;
    let use_count: i64 = row_helpers::get(row, 6, TABLE, "use_count")?;
    Ok(ServerHistoryEntry {
        key: row_helpers::get(row, 0, TABLE, "key")?,
        host: row_helpers::get(row, 1, TABLE, "host")?,
        port: row_helpers::get(row, 2, TABLE, "port")?,
        version: row_helpers::get(row, 3, TABLE, "version")?,
        username: row_helpers::get(row, 4, TABLE, "username")?,
        last_used: row_helpers::parse_time(&last_used, TABLE, "last_used")?,
        use_count: use_count.max(0) as u64,
    })
}
