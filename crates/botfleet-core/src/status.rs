use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::FleetError;
use crate::ids::SessionId;
use crate::world::Position;

pub const DEFAULT_PORT: u16 = 25565;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Dead,
    Respawning,
    Kicked,
    Error,
    Reconnecting,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Dead => "dead",
            Self::Respawning => "respawning",
            Self::Kicked => "kicked",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// States in which a live connection handle may be held.
    pub fn holds_handle(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Dead | Self::Respawning)
    }

    /// Persisted states that are reconnected automatically at startup.
    pub fn resumes_on_startup(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "disconnected" => Self::Disconnected,
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "dead" => Self::Dead,
            "respawning" => Self::Respawning,
            "kicked" => Self::Kicked,
            "error" => Self::Error,
            "reconnecting" => Self::Reconnecting,
            other => return Err(format!("unknown session status: {other}")),
        })
    }
}

/// Body of a create request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "serverHost")]
    pub host: Option<String>,
    /// Accepts a number or a numeric string.
    #[serde(default, alias = "serverPort")]
    pub port: Option<serde_json::Value>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub auth_key: Option<String>,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: Some(name.into()),
            host: Some(host.into()),
            port: Some(port.into()),
            ..Default::default()
        }
    }

    /// Validate required fields and build the initial record.
    pub fn into_record(self, id: SessionId, now: DateTime<Utc>) -> Result<SessionRecord, FleetError> {
        let name = non_empty(self.name).ok_or_else(|| FleetError::Validation("name is required".into()))?;
        let host = non_empty(self.host).ok_or_else(|| FleetError::Validation("host is required".into()))?;
        let port = parse_port(self.port)?;
        let username = non_empty(self.username).unwrap_or_else(|| name.clone());

        Ok(SessionRecord {
            id,
            display_name: name,
            target_host: host,
            target_port: port,
            username,
            protocol_version: non_empty(self.version),
            auth_key: non_empty(self.auth_key),
            status: SessionStatus::Disconnected,
            created_at: now,
            last_connected_at: None,
            connection_count: 0,
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

fn parse_port(v: Option<serde_json::Value>) -> Result<u16, FleetError> {
    let invalid = |v: &serde_json::Value| FleetError::Validation(format!("invalid port: {v}"));
    match v {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_PORT),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid(&serde_json::Value::Number(n.clone()))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(DEFAULT_PORT),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid(&serde_json::Value::String(s.clone()))),
        Some(other) => Err(invalid(&other)),
    }
}

/// Durable metadata for one session. Live handles and timers are never part
/// of the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub display_name: String,
    pub target_host: String,
    pub target_port: u16,
    pub username: String,
    pub protocol_version: Option<String>,
    pub auth_key: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub connection_count: u64,
}

/// Fields sampled from a live handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub username: String,
    pub position: Option<Position>,
    pub health: f32,
    pub food: u32,
    pub game_mode: String,
    pub ping: u32,
}

/// Immutable view of a session at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub display_name: String,
    pub target_host: String,
    pub target_port: u16,
    pub username: String,
    pub protocol_version: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub connection_count: u64,
    pub reconnecting: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveStatus>,
}

impl SessionSnapshot {
    pub fn new(record: &SessionRecord, reconnecting: bool, live: Option<LiveStatus>) -> Self {
        Self {
            id: record.id.clone(),
            display_name: record.display_name.clone(),
            target_host: record.target_host.clone(),
            target_port: record.target_port,
            username: record.username.clone(),
            protocol_version: record.protocol_version.clone(),
            status: record.status,
            created_at: record.created_at,
            last_connected_at: record.last_connected_at,
            connection_count: record.connection_count,
            reconnecting,
            connected: record.status == SessionStatus::Connected,
            live,
        }
    }
}
