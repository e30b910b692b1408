//! Push-channel wire protocol and inbound message handling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use botfleet_core::events::FleetEvent;
use botfleet_core::ids::ClientId;
use botfleet_core::world::WorldSnapshot;
use botfleet_core::{FleetError, SessionId, SessionSnapshot};
use botfleet_engine::Command;

use crate::server::AppState;

/// Server → client messages.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        message: String,
    },
    BotStatus {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        status: SessionSnapshot,
    },
    BotDeleted {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    WorldData {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(flatten)]
        world: WorldSnapshot,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn connected() -> Self {
        Self::Connected {
            message: "push channel connected".into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize push message");
                None
            }
        }
    }
}

impl From<&FleetEvent> for ServerMessage {
    fn from(event: &FleetEvent) -> Self {
        match event {
            FleetEvent::Status(snapshot) => Self::BotStatus {
                session_id: snapshot.id.clone(),
                status: snapshot.clone(),
            },
            FleetEvent::Deleted { session_id } => Self::BotDeleted {
                session_id: session_id.clone(),
            },
        }
    }
}

impl From<&FleetError> for ServerMessage {
    fn from(err: &FleetError) -> Self {
        Self::error(err.error_kind(), err.to_string())
    }
}

/// Client → server messages.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Restrict pushes to one session; without `sessionId` the filter is cleared.
    Subscribe {
        #[serde(rename = "sessionId", default)]
        session_id: Option<SessionId>,
    },
    Command {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        command: Command,
    },
    World {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

/// Types the server emits. Clients echoing them back are ignored.
const SERVER_TYPES: &[&str] = &["connected", "bot_status", "bot_deleted", "world_data", "error"];
const CLIENT_TYPES: &[&str] = &["subscribe", "command", "world"];

/// Parse one inbound frame. `Ok(None)` means the frame is ignored.
pub fn parse_client_message(raw: &str) -> Result<Option<ClientMessage>, ServerMessage> {
    let value: Value =
        serde_json::from_str(raw).map_err(|_| ServerMessage::error("invalid_message", "Invalid message format"))?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(ServerMessage::error("invalid_message", "Invalid message format"));
    };
    if SERVER_TYPES.contains(&kind) {
        tracing::debug!(kind, "ignoring server message type from client");
        return Ok(None);
    }
    if !CLIENT_TYPES.contains(&kind) {
        return Err(ServerMessage::error("unknown_type", format!("Unknown message type: {kind}")));
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ServerMessage::error("validation_error", e.to_string()))
}

/// Handle one inbound frame and return the direct reply, if any.
pub async fn handle_client_message(state: &AppState, client_id: &ClientId, raw: &str) -> Option<ServerMessage> {
    let message = match parse_client_message(raw) {
        Ok(Some(message)) => message,
        Ok(None) => return None,
        Err(reply) => return Some(reply),
    };

    match message {
        ClientMessage::Subscribe { session_id: None } => {
            state.registry.set_filter(client_id, None);
            tracing::debug!(client_id = %client_id, "subscription cleared");
            None
        }
        ClientMessage::Subscribe {
            session_id: Some(session_id),
        } => {
            if let Err(e) = state.fleet.get(&session_id) {
                return Some(ServerMessage::from(&e));
            }
            state.registry.set_filter(client_id, Some(session_id.clone()));
            tracing::debug!(client_id = %client_id, %session_id, "subscribed");
            state.broadcaster.push_status(&session_id);
            None
        }
        ClientMessage::Command { session_id, command } => match state.fleet.execute(&session_id, command).await {
            Ok(_) => {
                state.broadcaster.push_status(&session_id);
                None
            }
            Err(e) => Some(ServerMessage::from(&e)),
        },
        ClientMessage::World { session_id } => match state.fleet.world_snapshot(&session_id) {
            Ok(world) => Some(ServerMessage::WorldData { session_id, world }),
            Err(e) => Some(ServerMessage::from(&e)),
        },
    }
}

/// Drain inbound frames from every push client.
pub async fn process_messages(mut rx: mpsc::Receiver<(ClientId, String)>, state: AppState) {
    while let Some((client_id, raw)) = rx.recv().await {
        if let Some(reply) = handle_client_message(&state, &client_id, &raw).await {
            if let Some(json) = reply.to_json() {
                state.registry.send_to(&client_id, json);
            }
        }
    }
    tracing::debug!("push message processor stopped");
}
