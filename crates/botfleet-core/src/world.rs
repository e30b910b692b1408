use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::GameHandle;
use crate::errors::FleetError;
use crate::ids::SessionId;

pub const INVENTORY_SLOTS: u8 = 36;
pub const HOTBAR_SLOTS: u8 = 9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn block(&self) -> BlockPos {
        BlockPos::new(self.x.floor() as i32, self.y.floor() as i32, self.z.floor() as i32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    pub position: BlockPos,
}

impl BlockInfo {
    pub fn is_air(&self) -> bool {
        matches!(self.name.as_str(), "air" | "cave_air" | "void_air")
    }
}

/// Health and position as sampled from a live handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vitals {
    pub health: f32,
    pub food: u32,
    pub position: Option<Position>,
    pub game_mode: String,
    pub ping: u32,
}

impl Vitals {
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearbyEntity {
    #[serde(flatten)]
    pub entity: Entity,
    pub distance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub slot: u8,
    pub name: String,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryView {
    /// Always [`INVENTORY_SLOTS`] entries; 0-8 is the hotbar.
    pub slots: Vec<Option<ItemStack>>,
    pub held_item: Option<ItemStack>,
    pub selected_hotbar: u8,
}

/// Bounded scan around a live session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    pub position: Position,
    pub health: f32,
    pub food: u32,
    pub blocks: Vec<BlockInfo>,
    pub entities: Vec<NearbyEntity>,
    pub captured_at: DateTime<Utc>,
}

/// Produces world snapshots from a live handle. The engine only guarantees
/// the handle belongs to a connected session.
pub trait WorldSnapshotProvider: Send + Sync {
    fn snapshot(&self, session_id: &SessionId, handle: &dyn GameHandle) -> Result<WorldSnapshot, FleetError>;

    /// Drop any cached state for a session that has been deleted.
    fn forget(&self, _session_id: &SessionId) {}
}
