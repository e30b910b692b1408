//! HTTP control surface.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use botfleet_core::status::SessionConfig;
use botfleet_core::world::WorldSnapshot;
use botfleet_core::{FleetError, SessionId, SessionStatus};
use botfleet_engine::Command;

use crate::api_error::{ApiError, ApiResult};
use crate::client;
use crate::health::{self, HealthResponse, PingResponse};
use crate::server::AppState;
use crate::ws::ServerMessage;

pub async fn api_info(State(state): State<AppState>) -> Json<Value> {
    let counts = state.fleet.counts();
    Json(json!({
        "status": "active",
        "service": "botfleet",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": { "totalSessions": counts.total, "connectedSessions": counts.connected },
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.started_at, state.registry.count(), state.fleet.counts()))
}

pub async fn ping() -> Json<PingResponse> {
    Json(health::ping())
}

pub async fn not_found() -> ApiError {
    ApiError(FleetError::NotFound("Endpoint not found".into()))
}

// ── sessions ───────────────────────────────────────────────────────────

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.fleet.list();
    let connected = sessions.iter().filter(|s| s.status == SessionStatus::Connected).count();
    Json(json!({ "sessions": sessions, "count": sessions.len(), "connected": connected }))
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<SessionConfig>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(config) = body.map_err(|e| FleetError::Validation(e.body_text()))?;
    let session = state.fleet.create(config)?;

    if let Err(e) = state.history.record(
        &session.target_host,
        session.target_port,
        session.protocol_version.as_deref(),
        Some(&session.username),
    ) {
        tracing::warn!(session_id = %session.id, error = %e, "failed to record server history");
    }

    let location = format!("/sessions/{}", session.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location.clone())],
        Json(json!({ "session": session, "location": location })),
    ))
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.fleet.get(&SessionId::from_raw(id))?))
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.fleet.delete(&SessionId::from_raw(id))?;
    Ok(Json(json!({ "success": true, "message": "Session deleted" })))
}

pub async fn world(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<WorldSnapshot>> {
    Ok(Json(state.fleet.world_snapshot(&SessionId::from_raw(id))?))
}

pub async fn inventory(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    run_command(&state, SessionId::from_raw(id), Command::Inventory).await
}

/// `POST /sessions/{id}/{action}` for the in-world commands.
pub async fn session_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let kind = match action.as_str() {
        "move" | "look" | "chat" | "attack" | "place" | "dig" | "use" | "respawn" => action.as_str(),
        _ => return Err(FleetError::NotFound(format!("unknown action: {action}")).into()),
    };
    let command = parse_command(kind, &body)?;
    run_command(&state, SessionId::from_raw(id), command).await
}

/// `POST /sessions/{id}/inventory/{op}` for swap and equip.
pub async fn inventory_action(
    State(state): State<AppState>,
    Path((id, op)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let kind = match op.as_str() {
        "swap" | "equip" => op.as_str(),
        _ => return Err(FleetError::NotFound(format!("unknown inventory operation: {op}")).into()),
    };
    let command = parse_command(kind, &body)?;
    run_command(&state, SessionId::from_raw(id), command).await
}

/// Body fields plus the route's command kind. An empty or `null` body is `{}`.
fn parse_command(kind: &str, body: &[u8]) -> Result<Command, FleetError> {
    let mut payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| FleetError::Validation(format!("invalid JSON body: {e}")))?
    };
    if payload.is_null() {
        payload = json!({});
    }
    let Some(fields) = payload.as_object_mut() else {
        return Err(FleetError::Validation("request body must be a JSON object".into()));
    };
    fields.insert("kind".into(), Value::from(kind));
    serde_json::from_value(payload).map_err(|e| FleetError::Validation(e.to_string()))
}

async fn run_command(state: &AppState, id: SessionId, command: Command) -> ApiResult<Json<Value>> {
    let outcome = state.fleet.execute(&id, command).await?;
    Ok(Json(outcome.to_json()))
}

// ── server history ─────────────────────────────────────────────────────

pub async fn list_servers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let servers = state.history.list()?;
    Ok(Json(json!({ "count": servers.len(), "servers": servers })))
}

pub async fn delete_server(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Json<Value>> {
    if !state.history.delete(&key)? {
        return Err(FleetError::NotFound(format!("server {key}")).into());
    }
    Ok(Json(json!({ "success": true, "message": "Server removed from history" })))
}

// ── push channel ───────────────────────────────────────────────────────

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.registry.register();
    tracing::info!(client_id = %client_id, "push client connected");
    if let Some(json) = ServerMessage::connected().to_json() {
        state.registry.send_to(&client_id, json);
    }

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.registry.clone(),
        state.message_tx.clone(),
        state.heartbeat,
        state.cancel.clone(),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_an_empty_object() {
        assert_eq!(parse_command("attack", b"").unwrap(), Command::Attack);
        assert_eq!(parse_command("use", b"  \n").unwrap(), Command::Use);
        assert_eq!(parse_command("respawn", b"null").unwrap(), Command::Respawn);
    }

    #[test]
    fn route_kind_overrides_body() {
        let cmd = parse_command("chat", br#"{"kind":"respawn","message":"hi"}"#).unwrap();
        assert_eq!(cmd, Command::Chat { message: "hi".into() });
    }

    #[test]
    fn bad_bodies_are_validation_errors() {
        assert!(matches!(parse_command("look", b"[1,2]"), Err(FleetError::Validation(_))));
        assert!(matches!(parse_command("look", b"{"), Err(FleetError::Validation(_))));
        assert!(matches!(parse_command("look", br#"{"yaw":1}"#), Err(FleetError::Validation(_))));
        assert!(matches!(parse_command("swap", br#"{"fromSlot":"a","toSlot":1}"#), Err(FleetError::Validation(_))));
    }

    #[test]
    fn move_accepts_snake_case_duration() {
        let cmd = parse_command("move", br#"{"action":"forward","duration_ms":250}"#).unwrap();
        assert_eq!(cmd, Command::Move { action: "forward".into(), duration_ms: 250 });
    }
}
