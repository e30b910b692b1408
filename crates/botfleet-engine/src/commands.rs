use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use botfleet_core::world::{BlockPos, InventoryView, NearbyEntity};

pub const DEFAULT_MOVE_MS: u64 = 1000;

fn default_move_ms() -> u64 {
    DEFAULT_MOVE_MS
}

/// In-world commands accepted for a connected session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Move {
        action: String,
        #[serde(rename = "durationMs", alias = "duration_ms", alias = "duration", default = "default_move_ms")]
        duration_ms: u64,
    },
    Look {
        yaw: f32,
        pitch: f32,
    },
    Chat {
        message: String,
    },
    Attack,
    Inventory,
    Swap {
        #[serde(rename = "fromSlot")]
        from_slot: i64,
        #[serde(rename = "toSlot")]
        to_slot: i64,
    },
    Equip {
        slot: i64,
    },
    Place {
        x: f64,
        y: f64,
        z: f64,
        #[serde(rename = "blockName")]
        block_name: String,
    },
    Dig {
        x: f64,
        y: f64,
        z: f64,
    },
    Use,
    Respawn,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Look { .. } => "look",
            Self::Chat { .. } => "chat",
            Self::Attack => "attack",
            Self::Inventory => "inventory",
            Self::Swap { .. } => "swap",
            Self::Equip { .. } => "equip",
            Self::Place { .. } => "place",
            Self::Dig { .. } => "dig",
            Self::Use => "use",
            Self::Respawn => "respawn",
        }
    }
}

pub(crate) fn block_pos(x: f64, y: f64, z: f64) -> BlockPos {
    BlockPos::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
}

/// Result of a successful command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    Done { message: String },
    Attacked { target: NearbyEntity },
    NothingToAttack,
    Inventory(InventoryView),
}

impl CommandOutcome {
    pub(crate) fn done(message: impl Into<String>) -> Self {
        Self::Done { message: message.into() }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Done { message } => json!({ "success": true, "message": message }),
            Self::Attacked { target } => json!({
                "success": true,
                "message": format!("Attacked {}", target.entity.name),
                "target": target,
            }),
            Self::NothingToAttack => json!({ "success": false, "message": "No nearby entities" }),
            Self::Inventory(view) => json!({ "success": true, "inventory": view }),
        }
    }
}
