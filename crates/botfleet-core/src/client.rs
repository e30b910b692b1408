//! Contract for the external game-protocol client.
//!
//! The engine never parses packets. It asks a [`GameConnector`] for a handle,
//! receives lifecycle notifications through an [`EventSink`], and drives
//! in-world actions through the [`GameHandle`] capability interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{ActionError, ConnectError};
use crate::world::{BlockInfo, BlockPos, Entity, InventoryView, NearbyEntity, Vitals};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `None` asks the client to negotiate the version itself.
    pub version: Option<String>,
    pub auth_key: Option<String>,
}

/// Lifecycle notifications emitted by a handle, in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    Login,
    Spawn,
    Death,
    Respawn,
    Kicked { reason: String },
    Error { message: String },
    End { reason: String },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Spawn => "spawn",
            Self::Death => "death",
            Self::Respawn => "respawn",
            Self::Kicked { .. } => "kicked",
            Self::Error { .. } => "error",
            Self::End { .. } => "end",
        }
    }
}

/// Callback handed to a connector. It captures only the identity of the
/// connection attempt it belongs to, never the session itself.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(GameEvent) + Send + Sync>);

impl EventSink {
    pub fn new(f: impl Fn(GameEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: GameEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// Movement control states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    Forward,
    Back,
    Left,
    Right,
    Jump,
    Sprint,
    Sneak,
}

impl Control {
    pub const ALL: [Control; 7] = [
        Self::Forward,
        Self::Back,
        Self::Left,
        Self::Right,
        Self::Jump,
        Self::Sprint,
        Self::Sneak,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
            Self::Jump => "jump",
            Self::Sprint => "sprint",
            Self::Sneak => "sneak",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Control {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("invalid action: {s} (valid: forward, back, left, right, jump, sprint, sneak)"))
    }
}

pub trait GameConnector: Send + Sync {
    /// Start a connection attempt. Synchronous failures (bad version,
    /// refused handshake) are returned; everything after that arrives on
    /// `events`.
    fn connect(&self, options: &ConnectOptions, events: EventSink) -> Result<Arc<dyn GameHandle>, ConnectError>;
}

/// Capabilities of one live connection.
#[async_trait]
pub trait GameHandle: Send + Sync {
    fn username(&self) -> String;
    fn vitals(&self) -> Vitals;

    fn set_control(&self, control: Control, pressed: bool);
    fn clear_controls(&self);
    async fn look(&self, yaw: f32, pitch: f32) -> Result<(), ActionError>;
    fn chat(&self, message: &str) -> Result<(), ActionError>;

    /// Entities known to the client, excluding the session's own.
    fn entities(&self) -> Vec<Entity>;
    async fn attack(&self, entity_id: i64) -> Result<(), ActionError>;

    fn inventory(&self) -> InventoryView;
    fn select_hotbar(&self, slot: u8) -> Result<(), ActionError>;
    async fn swap_slots(&self, from: u8, to: u8) -> Result<(), ActionError>;

    fn block_at(&self, pos: BlockPos) -> Option<BlockInfo>;
    async fn place_block(&self, against: BlockPos, block_name: &str) -> Result<(), ActionError>;
    async fn dig(&self, pos: BlockPos) -> Result<(), ActionError>;
    fn activate_item(&self) -> Result<(), ActionError>;

    /// Probed once per handle; the answer is cached by the caller.
    fn supports_respawn(&self) -> bool;
    fn respawn(&self) -> Result<(), ActionError>;

    /// Remove every event subscription and close the connection. No event
    /// may be delivered through this handle's sink afterwards.
    fn detach(&self);

    fn nearest_entity(&self) -> Option<NearbyEntity> {
        let origin = self.vitals().position?;
        self.entities()
            .into_iter()
            .map(|entity| {
                let distance = origin.distance_to(&entity.position);
                NearbyEntity { entity, distance }
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn control_parse() {
        assert_eq!("sprint".parse::<Control>().unwrap(), Control::Sprint);
        let err = "fly".parse::<Control>().unwrap_err();
        assert!(err.contains("fly"));
        assert_eq!(serde_json::to_value(Control::Back).unwrap(), "back");
    }

    #[test]
    fn sink_invokes_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sink = EventSink::new(move |ev| {
            assert_eq!(ev, GameEvent::Login);
            h.fetch_add(1, Ordering::SeqCst);
        });
        sink.clone().emit(GameEvent::Login);
        sink.emit(GameEvent::Login);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn event_names() {
        assert_eq!(GameEvent::Kicked { reason: "x".into() }.name(), "kicked");
        assert_eq!(GameEvent::End { reason: String::new() }.name(), "end");
    }
}
