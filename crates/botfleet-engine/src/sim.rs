//! In-process game client.
//!
//! `SimConnector` hands out `SimHandle`s backed by a small flat world. It is
//! the default connector of the binary and the test double for everything
//! above the collaborator boundary. Lifecycle notifications are driven
//! explicitly (`login`, `kick`, `die`, ...) or automatically with
//! [`SimConnector::auto`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use botfleet_core::client::{ConnectOptions, Control, EventSink, GameConnector, GameEvent, GameHandle};
use botfleet_core::world::{
    BlockInfo, BlockPos, Entity, InventoryView, ItemStack, Position, Vitals, HOTBAR_SLOTS, INVENTORY_SLOTS,
};
use botfleet_core::{ActionError, ConnectError};

const MAX_HEALTH: f32 = 20.0;
const LOADED_RADIUS: i32 = 64;
const MIN_Y: i32 = -64;
const MAX_Y: i32 = 319;
const GROUND_Y: i32 = 63;

#[derive(Default)]
struct ConnectorState {
    auto_login: bool,
    respawn_unsupported: bool,
    rejected: Vec<Option<String>>,
    fail_next: VecDeque<ConnectError>,
    attempts: Vec<Option<String>>,
    handles: Vec<Arc<SimHandle>>,
}

#[derive(Default)]
pub struct SimConnector {
    state: Mutex<ConnectorState>,
}

impl SimConnector {
    /// Handles stay silent until driven.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles log in and spawn as soon as they connect.
    pub fn auto() -> Self {
        let sim = Self::default();
        sim.state.lock().auto_login = true;
        sim
    }

    /// Fail attempts at these versions (`None` is auto-detect) with a
    /// version-class error.
    pub fn reject_versions(&self, versions: &[Option<&str>]) {
        self.state
            .lock()
            .rejected
            .extend(versions.iter().map(|v| v.map(str::to_owned)));
    }

    /// Fail the next attempt with `err`, regardless of version.
    pub fn fail_next(&self, err: ConnectError) {
        self.state.lock().fail_next.push_back(err);
    }

    pub fn set_respawn_supported(&self, supported: bool) {
        self.state.lock().respawn_unsupported = !supported;
    }

    /// Requested version of every attempt so far, in order.
    pub fn attempts(&self) -> Vec<Option<String>> {
        self.state.lock().attempts.clone()
    }

    pub fn handles(&self) -> Vec<Arc<SimHandle>> {
        self.state.lock().handles.clone()
    }

    pub fn last_handle(&self) -> Option<Arc<SimHandle>> {
        self.state.lock().handles.last().cloned()
    }
}

impl GameConnector for SimConnector {
    fn connect(&self, options: &ConnectOptions, events: EventSink) -> Result<Arc<dyn GameHandle>, ConnectError> {
        let mut state = self.state.lock();
        state.attempts.push(options.version.clone());
        if let Some(err) = state.fail_next.pop_front() {
            return Err(err);
        }
        if state.rejected.contains(&options.version) {
            return Err(ConnectError::Version(format!(
                "server does not speak protocol version {}",
                options.version.as_deref().unwrap_or("auto")
            )));
        }

        let handle = Arc::new(SimHandle::new(&options.username, events, !state.respawn_unsupported));
        state.handles.push(handle.clone());
        let auto = state.auto_login;
        drop(state);

        if auto {
            handle.login();
            handle.spawn();
        }
        Ok(handle)
    }
}

struct SimWorld {
    username: String,
    health: f32,
    food: u32,
    position: Position,
    pressed: HashSet<Control>,
    control_log: Vec<(Control, bool)>,
    slots: Vec<Option<ItemStack>>,
    selected: u8,
    blocks: HashMap<BlockPos, String>,
    entities: Vec<Entity>,
    chat: Vec<String>,
    attacked: Vec<i64>,
    look: (f32, f32),
    activations: u32,
    respawns: u32,
    revive_on_respawn: bool,
}

impl SimWorld {
    fn new(username: &str) -> Self {
        let mut blocks = HashMap::new();
        for x in -16..=16 {
            for z in -16..=16 {
                blocks.insert(BlockPos::new(x, GROUND_Y, z), "stone".to_string());
            }
        }
        blocks.insert(BlockPos::new(2, GROUND_Y + 1, 2), "oak_log".to_string());

        let mut slots = vec![None; INVENTORY_SLOTS as usize];
        for (slot, name, count) in [(0u8, "stone", 64), (1, "wooden_pickaxe", 1), (10, "bread", 16)] {
            slots[slot as usize] = Some(ItemStack { slot, name: name.to_string(), count });
        }

        Self {
            username: username.to_string(),
            health: MAX_HEALTH,
            food: 20,
            position: Position::new(0.5, (GROUND_Y + 1) as f64, 0.5),
            pressed: HashSet::new(),
            control_log: Vec::new(),
            slots,
            selected: 0,
            blocks,
            entities: vec![
                Entity {
                    id: 1,
                    name: "cow".into(),
                    kind: "animal".into(),
                    position: Position::new(3.5, 64.0, 2.5),
                },
                Entity {
                    id: 2,
                    name: "zombie".into(),
                    kind: "hostile".into(),
                    position: Position::new(-6.5, 64.0, 5.5),
                },
            ],
            chat: Vec::new(),
            attacked: Vec::new(),
            look: (0.0, 0.0),
            activations: 0,
            respawns: 0,
            revive_on_respawn: true,
        }
    }

    fn block_name(&self, pos: BlockPos) -> Option<&str> {
        let loaded = pos.x.abs() <= LOADED_RADIUS && pos.z.abs() <= LOADED_RADIUS && (MIN_Y..=MAX_Y).contains(&pos.y);
        loaded.then(|| self.blocks.get(&pos).map_or("air", String::as_str))
    }
}

pub struct SimHandle {
    events: EventSink,
    detached: AtomicBool,
    respawn_supported: bool,
    world: Mutex<SimWorld>,
}

impl SimHandle {
    fn new(username: &str, events: EventSink, respawn_supported: bool) -> Self {
        Self {
            events,
            detached: AtomicBool::new(false),
            respawn_supported,
            world: Mutex::new(SimWorld::new(username)),
        }
    }

    /// Deliver an event unless the handle has been detached.
    pub fn emit(&self, event: GameEvent) {
        if !self.is_detached() {
            self.events.emit(event);
        }
    }

    /// Deliver an event even after detach, as a misbehaving client would.
    pub fn emit_raw(&self, event: GameEvent) {
        self.events.emit(event);
    }

    pub fn login(&self) {
        self.emit(GameEvent::Login);
    }

    pub fn spawn(&self) {
        self.emit(GameEvent::Spawn);
    }

    pub fn die(&self) {
        self.world.lock().health = 0.0;
        self.emit(GameEvent::Death);
    }

    /// Full health, then `Respawn` and `Spawn`.
    pub fn revive(&self) {
        self.world.lock().health = MAX_HEALTH;
        self.emit(GameEvent::Respawn);
        self.emit(GameEvent::Spawn);
    }

    pub fn kick(&self, reason: &str) {
        self.emit(GameEvent::Kicked { reason: reason.to_string() });
    }

    pub fn error(&self, message: &str) {
        self.emit(GameEvent::Error { message: message.to_string() });
    }

    pub fn end(&self) {
        self.emit(GameEvent::End { reason: "socket closed".to_string() });
    }

    pub fn set_health(&self, health: f32) {
        self.world.lock().health = health;
    }

    pub fn set_entities(&self, entities: Vec<Entity>) {
        self.world.lock().entities = entities;
    }

    /// Whether a manual respawn brings the player back.
    pub fn set_revive_on_respawn(&self, revive: bool) {
        self.world.lock().revive_on_respawn = revive;
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn pressed(&self) -> HashSet<Control> {
        self.world.lock().pressed.clone()
    }

    pub fn control_log(&self) -> Vec<(Control, bool)> {
        self.world.lock().control_log.clone()
    }

    pub fn presses_of(&self, control: Control) -> usize {
        self.world
            .lock()
            .control_log
            .iter()
            .filter(|(c, pressed)| *c == control && *pressed)
            .count()
    }

    pub fn chat_log(&self) -> Vec<String> {
        self.world.lock().chat.clone()
    }

    pub fn attacked(&self) -> Vec<i64> {
        self.world.lock().attacked.clone()
    }

    pub fn respawn_requests(&self) -> u32 {
        self.world.lock().respawns
    }

    pub fn inventory_view(&self) -> InventoryView {
        GameHandle::inventory(self)
    }
}

#[async_trait]
impl GameHandle for SimHandle {
    fn username(&self) -> String {
        self.world.lock().username.clone()
    }

    fn vitals(&self) -> Vitals {
        let w = self.world.lock();
        Vitals {
            health: w.health,
            food: w.food,
            position: Some(w.position),
            game_mode: "survival".to_string(),
            ping: 0,
        }
    }

    fn set_control(&self, control: Control, pressed: bool) {
        let mut w = self.world.lock();
        if pressed {
            w.pressed.insert(control);
        } else {
            w.pressed.remove(&control);
        }
        w.control_log.push((control, pressed));
    }

    fn clear_controls(&self) {
        self.world.lock().pressed.clear();
    }

    async fn look(&self, yaw: f32, pitch: f32) -> Result<(), ActionError> {
        self.world.lock().look = (yaw, pitch);
        Ok(())
    }

    fn chat(&self, message: &str) -> Result<(), ActionError> {
        self.world.lock().chat.push(message.to_string());
        Ok(())
    }

    fn entities(&self) -> Vec<Entity> {
        self.world.lock().entities.clone()
    }

    async fn attack(&self, entity_id: i64) -> Result<(), ActionError> {
        let mut w = self.world.lock();
        if !w.entities.iter().any(|e| e.id == entity_id) {
            return Err(ActionError::Rejected(format!("entity {entity_id} is gone")));
        }
        w.attacked.push(entity_id);
        Ok(())
    }

    fn inventory(&self) -> InventoryView {
        let w = self.world.lock();
        InventoryView {
            slots: w.slots.clone(),
            held_item: w.slots[w.selected as usize].clone(),
            selected_hotbar: w.selected,
        }
    }

    fn select_hotbar(&self, slot: u8) -> Result<(), ActionError> {
        if slot >= HOTBAR_SLOTS {
            return Err(ActionError::Rejected(format!("slot {slot} is not on the hotbar")));
        }
        self.world.lock().selected = slot;
        Ok(())
    }

    async fn swap_slots(&self, from: u8, to: u8) -> Result<(), ActionError> {
        if from >= INVENTORY_SLOTS || to >= INVENTORY_SLOTS {
            return Err(ActionError::Rejected("slot out of range".into()));
        }
        let mut w = self.world.lock();
        w.slots.swap(from as usize, to as usize);
        for idx in [from, to] {
            if let Some(item) = w.slots[idx as usize].as_mut() {
                item.slot = idx;
            }
        }
        Ok(())
    }

    fn block_at(&self, pos: BlockPos) -> Option<BlockInfo> {
        let w = self.world.lock();
        w.block_name(pos).map(|name| BlockInfo {
            name: name.to_string(),
            position: pos,
        })
    }

    async fn place_block(&self, against: BlockPos, block_name: &str) -> Result<(), ActionError> {
        let mut w = self.world.lock();
        let target = against.offset(0, 1, 0);
        let base = w.block_name(against).map(str::to_owned);
        let occupant = w.block_name(target).map(str::to_owned);
        match (base.as_deref(), occupant.as_deref()) {
            (Some("air") | None, _) => Err(ActionError::Rejected("cannot place against air".into())),
            (_, None) => Err(ActionError::Rejected("target is outside the loaded area".into())),
            (_, Some(name)) if name != "air" => Err(ActionError::Rejected(format!("{name} is in the way"))),
            _ => {
                w.blocks.insert(target, block_name.to_string());
                Ok(())
            }
        }
    }

    async fn dig(&self, pos: BlockPos) -> Result<(), ActionError> {
        let mut w = self.world.lock();
        if w.blocks.remove(&pos).is_none() {
            return Err(ActionError::Rejected("nothing to dig".into()));
        }
        Ok(())
    }

    fn activate_item(&self) -> Result<(), ActionError> {
        self.world.lock().activations += 1;
        Ok(())
    }

    fn supports_respawn(&self) -> bool {
        self.respawn_supported
    }

    fn respawn(&self) -> Result<(), ActionError> {
        if !self.respawn_supported {
            return Err(ActionError::Unsupported("respawn is not available".into()));
        }
        let revive = {
            let mut w = self.world.lock();
            w.respawns += 1;
            w.revive_on_respawn
        };
        if revive {
            self.revive();
        }
        Ok(())
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}
