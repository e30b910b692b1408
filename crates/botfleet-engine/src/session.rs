//! One managed connection and its lifecycle state machine.
//!
//! A `Session` is only ever touched with the fleet registry locked, so every
//! method here runs to completion without interleaving. Callbacks from the
//! game client and from timers never reach a `Session` directly: they are
//! queued as [`Dispatch`] messages tagged with the connection generation or
//! timer token they were issued for, and stale ones are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use botfleet_core::client::{ConnectOptions, Control, EventSink, GameConnector, GameEvent, GameHandle};
use botfleet_core::events::FleetEvent;
use botfleet_core::status::LiveStatus;
use botfleet_core::store::SessionStore;
use botfleet_core::versions::fallback_ladder;
use botfleet_core::world::{BlockPos, NearbyEntity, HOTBAR_SLOTS, INVENTORY_SLOTS};
use botfleet_core::{ConnectError, FleetError, SessionId, SessionRecord, SessionSnapshot, SessionStatus};
use botfleet_settings::LifecycleSettings;

use crate::commands::{block_pos, Command, CommandOutcome};
use crate::timer::DeferredAction;

/// Shared collaborators used by every session.
pub(crate) struct Runtime {
    pub connector: Arc<dyn GameConnector>,
    pub store: Arc<dyn SessionStore>,
    pub events: broadcast::Sender<FleetEvent>,
    pub tx: mpsc::UnboundedSender<Dispatch>,
    pub timings: LifecycleSettings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Reconnect,
    SpawnCheck,
    ClearControls,
    StartIdle,
    IdleTick,
    IdleRelease,
    Release(Control),
}

#[derive(Debug)]
pub(crate) enum Dispatch {
    Game {
        session_id: SessionId,
        generation: u64,
        event: GameEvent,
    },
    Timer {
        session_id: SessionId,
        token: u64,
        kind: TimerKind,
    },
}

struct Scheduled {
    token: u64,
    _action: DeferredAction,
}

/// Work that must run against the handle without the registry locked.
pub(crate) enum PendingAction {
    Look { yaw: f32, pitch: f32 },
    Attack(NearbyEntity),
    Swap { from: u8, to: u8, message: String },
    Place { against: BlockPos, block_name: String },
    Dig(BlockPos),
}

pub(crate) enum Prepared {
    Done(CommandOutcome),
    /// Issued against the connection `generation` it was prepared for.
    Pending {
        handle: Arc<dyn GameHandle>,
        generation: u64,
        action: PendingAction,
    },
}

pub(crate) struct Session {
    record: SessionRecord,
    reconnect_guard: bool,
    generation: u64,
    handle: Option<Arc<dyn GameHandle>>,
    can_respawn: bool,
    respawn_attempts: u32,
    next_token: u64,
    reconnect: Option<Scheduled>,
    spawn_check: Option<Scheduled>,
    clear_controls: Option<Scheduled>,
    idle_start: Option<Scheduled>,
    idle: Option<Scheduled>,
    idle_release: Option<Scheduled>,
    releases: HashMap<Control, Scheduled>,
}

impl Session {
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            reconnect_guard: false,
            generation: 0,
            handle: None,
            can_respawn: false,
            respawn_attempts: 0,
            next_token: 0,
            reconnect: None,
            spawn_check: None,
            clear_controls: None,
            idle_start: None,
            idle: None,
            idle_release: None,
            releases: HashMap::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.record.id
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_idle_running(&self) -> bool {
        self.idle.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let live = match (&self.handle, self.record.status) {
            (Some(h), SessionStatus::Connected | SessionStatus::Dead | SessionStatus::Respawning) => {
                let v = h.vitals();
                Some(LiveStatus {
                    username: h.username(),
                    position: v.position,
                    health: v.health,
                    food: v.food,
                    game_mode: v.game_mode,
                    ping: v.ping,
                })
            }
            _ => None,
        };
        SessionSnapshot::new(&self.record, self.reconnect_guard, live)
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Open a new connection, walking the version ladder on version-class
    /// failures. Any previous handle is detached first.
    pub fn connect(&mut self, rt: &Runtime) {
        self.detach_handle();
        self.set_status(rt, SessionStatus::Connecting);

        let requested = self.record.protocol_version.clone();
        let err = match self.attempt(rt, requested.clone()) {
            Ok(handle) => {
                self.install(handle);
                return;
            }
            Err(e) => e,
        };

        if !err.is_version_related() {
            return self.fail(rt, err);
        }

        warn!(session_id = %self.record.id, error = %err, "version negotiation failed, walking fallback ladder");
        let mut last = err;
        for version in fallback_ladder(requested.as_deref()) {
            match self.attempt(rt, version.clone()) {
                Ok(handle) => {
                    info!(
                        session_id = %self.record.id,
                        version = version.as_deref().unwrap_or("auto"),
                        "connected with fallback version"
                    );
                    if let Some(v) = version {
                        self.record.protocol_version = Some(v);
                        self.persist(rt);
                    }
                    self.install(handle);
                    return;
                }
                Err(e) if e.is_version_related() => last = e,
                Err(e) => return self.fail(rt, e),
            }
        }
        self.fail(rt, last);
    }

    fn attempt(&mut self, rt: &Runtime, version: Option<String>) -> Result<Arc<dyn GameHandle>, ConnectError> {
        self.generation += 1;
        let options = ConnectOptions {
            host: self.record.target_host.clone(),
            port: self.record.target_port,
            username: self.record.username.clone(),
            version,
            auth_key: self.record.auth_key.clone(),
        };
        debug!(session_id = %self.record.id, version = ?options.version, generation = self.generation, "connect attempt");
        rt.connector.connect(&options, self.sink(rt))
    }

    fn sink(&self, rt: &Runtime) -> EventSink {
        let tx = rt.tx.clone();
        let session_id = self.record.id.clone();
        let generation = self.generation;
        EventSink::new(move |event| {
            let _ = tx.send(Dispatch::Game {
                session_id: session_id.clone(),
                generation,
                event,
            });
        })
    }

    fn install(&mut self, handle: Arc<dyn GameHandle>) {
        self.can_respawn = handle.supports_respawn();
        self.respawn_attempts = 0;
        self.handle = Some(handle);
    }

    fn fail(&mut self, rt: &Runtime, err: ConnectError) {
        warn!(session_id = %self.record.id, error = %err, "connect failed");
        self.set_status(rt, SessionStatus::Error);
        self.schedule_reconnect(rt);
    }

    pub fn on_game_event(&mut self, rt: &Runtime, event: GameEvent) {
        let id = self.record.id.clone();
        match event {
            GameEvent::Login => {
                self.record.last_connected_at = Some(Utc::now());
                self.record.connection_count += 1;
                info!(session_id = %id, count = self.record.connection_count, "logged in");
                self.set_status(rt, SessionStatus::Connected);
                self.schedule_idle_start(rt);
            }
            GameEvent::Spawn => {
                debug!(session_id = %id, "spawned");
                self.spawn_check = Some(self.schedule(rt, rt.timings.spawn_check_delay(), TimerKind::SpawnCheck));
            }
            GameEvent::Death => {
                info!(session_id = %id, "died, waiting for respawn");
                self.stop_idle();
                self.release_controls();
                self.set_status(rt, SessionStatus::Dead);
            }
            GameEvent::Respawn => {
                info!(session_id = %id, "respawning");
                self.set_status(rt, SessionStatus::Respawning);
            }
            GameEvent::Kicked { reason } => {
                warn!(session_id = %id, %reason, "kicked");
                self.cleanup();
                self.set_status(rt, SessionStatus::Kicked);
                self.schedule_reconnect(rt);
            }
            GameEvent::Error { message } => {
                warn!(session_id = %id, error = %message, "connection error");
                self.cleanup();
                self.set_status(rt, SessionStatus::Error);
                self.schedule_reconnect(rt);
            }
            GameEvent::End { reason } => {
                info!(session_id = %id, %reason, "connection ended");
                self.cleanup();
                self.set_status(rt, SessionStatus::Disconnected);
                if !self.reconnect_guard {
                    self.schedule_reconnect(rt);
                }
            }
        }
    }

    /// Guarded: a second request while one is pending is a no-op.
    pub fn schedule_reconnect(&mut self, rt: &Runtime) {
        if self.reconnect_guard {
            debug!(session_id = %self.record.id, "reconnect already pending");
            return;
        }
        self.reconnect_guard = true;
        self.detach_handle();
        let delay = rt.timings.reconnect_delay();
        info!(session_id = %self.record.id, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.set_status(rt, SessionStatus::Reconnecting);
        self.reconnect = Some(self.schedule(rt, delay, TimerKind::Reconnect));
    }

    pub fn on_timer(&mut self, rt: &Runtime, token: u64, kind: TimerKind) {
        if !self.claim(kind, token) {
            return;
        }
        match kind {
            TimerKind::Reconnect => {
                self.reconnect_guard = false;
                self.connect(rt);
            }
            TimerKind::SpawnCheck => self.check_spawn_health(rt),
            TimerKind::ClearControls => {
                if let Some(h) = &self.handle {
                    h.clear_controls();
                }
            }
            TimerKind::StartIdle => self.start_idle(rt),
            TimerKind::IdleTick => self.idle_tick(rt),
            TimerKind::IdleRelease => {
                if let Some(h) = &self.handle {
                    h.set_control(Control::Jump, false);
                }
            }
            TimerKind::Release(control) => {
                if let Some(h) = &self.handle {
                    h.set_control(control, false);
                }
            }
        }
    }

    fn check_spawn_health(&mut self, rt: &Runtime) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        if handle.vitals().is_alive() {
            self.respawn_attempts = 0;
            if matches!(self.record.status, SessionStatus::Dead | SessionStatus::Respawning) {
                info!(session_id = %self.record.id, "alive again");
                self.set_status(rt, SessionStatus::Connected);
            }
            self.clear_controls = Some(self.schedule(rt, rt.timings.control_clear_delay(), TimerKind::ClearControls));
            self.schedule_idle_start(rt);
            return;
        }

        self.stop_idle();
        if self.record.status != SessionStatus::Dead {
            self.set_status(rt, SessionStatus::Dead);
        }
        if self.respawn_attempts >= rt.timings.max_respawn_retries {
            warn!(
                session_id = %self.record.id,
                attempts = self.respawn_attempts,
                "still dead after respawn retries, waiting"
            );
            return;
        }
        self.respawn_attempts += 1;
        if self.can_respawn {
            if let Err(e) = handle.respawn() {
                warn!(session_id = %self.record.id, error = %e, "respawn request failed");
            }
        }
        debug!(session_id = %self.record.id, attempt = self.respawn_attempts, "spawned dead, retrying health check");
        self.spawn_check = Some(self.schedule(rt, rt.timings.respawn_retry_delay(), TimerKind::SpawnCheck));
    }

    fn alive_and_connected(&self) -> bool {
        self.record.status == SessionStatus::Connected
            && self.handle.as_ref().is_some_and(|h| h.vitals().is_alive())
    }

    /// No-op while the idle task runs or a start is already pending.
    fn schedule_idle_start(&mut self, rt: &Runtime) {
        if self.idle.is_some() || self.idle_start.is_some() {
            return;
        }
        self.idle_start = Some(self.schedule(rt, rt.timings.settle_delay(), TimerKind::StartIdle));
    }

    fn start_idle(&mut self, rt: &Runtime) {
        if !self.alive_and_connected() {
            return;
        }
        self.idle = None;
        let token = self.take_token();
        let tx = rt.tx.clone();
        let session_id = self.record.id.clone();
        let action = DeferredAction::repeating(rt.timings.idle_interval(), move || {
            let _ = tx.send(Dispatch::Timer {
                session_id: session_id.clone(),
                token,
                kind: TimerKind::IdleTick,
            });
        });
        self.idle = Some(Scheduled { token, _action: action });
        debug!(session_id = %self.record.id, "idle task started");
    }

    fn idle_tick(&mut self, rt: &Runtime) {
        if !self.alive_and_connected() {
            self.stop_idle();
            return;
        }
        if let Some(h) = &self.handle {
            h.set_control(Control::Jump, true);
        }
        self.idle_release = Some(self.schedule(rt, rt.timings.idle_pulse(), TimerKind::IdleRelease));
    }

    fn stop_idle(&mut self) {
        if self.idle.take().is_some() {
            debug!(session_id = %self.record.id, "idle task stopped");
        }
        self.idle_start = None;
        self.idle_release = None;
    }

    fn release_controls(&mut self) {
        self.releases.clear();
        self.clear_controls = None;
        if let Some(h) = &self.handle {
            h.clear_controls();
        }
    }

    /// Cancel every timer except a pending reconnect, and drop the handle.
    pub fn cleanup(&mut self) {
        self.stop_idle();
        self.spawn_check = None;
        self.clear_controls = None;
        self.releases.clear();
        self.detach_handle();
    }

    /// Stop everything, including a pending reconnect. Used on delete and
    /// on process shutdown.
    pub fn halt(&mut self) {
        self.cleanup();
        self.reconnect = None;
        self.reconnect_guard = false;
    }

    fn detach_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.detach();
            debug!(session_id = %self.record.id, generation = self.generation, "handle detached");
        }
        self.generation += 1;
    }

    // ── commands ────────────────────────────────────────────────────────

    /// The handle, if the session is connected.
    pub fn live_handle(&self) -> Option<Arc<dyn GameHandle>> {
        self.ready_handle().ok()
    }

    fn ready_handle(&self) -> Result<Arc<dyn GameHandle>, FleetError> {
        match (&self.handle, self.record.status) {
            (Some(h), SessionStatus::Connected) => Ok(h.clone()),
            _ => Err(FleetError::not_connected()),
        }
    }

    pub fn prepare(&mut self, rt: &Runtime, command: Command) -> Result<Prepared, FleetError> {
        if let Command::Respawn = command {
            return self.force_respawn().map(Prepared::Done);
        }

        let handle = self.ready_handle()?;
        let prepared = match command {
            Command::Move { action, duration_ms } => {
                if !handle.vitals().is_alive() {
                    return Err(FleetError::Precondition("session is dead".into()));
                }
                let control: Control = action.parse().map_err(FleetError::Precondition)?;
                handle.clear_controls();
                self.releases.clear();
                handle.set_control(control, true);
                let release = self.schedule(rt, Duration::from_millis(duration_ms), TimerKind::Release(control));
                self.releases.insert(control, release);
                Prepared::Done(CommandOutcome::done(format!("{control} for {duration_ms}ms")))
            }
            Command::Look { yaw, pitch } => self.pending(handle, PendingAction::Look { yaw, pitch }),
            Command::Chat { message } => {
                if message.trim().is_empty() {
                    return Err(FleetError::Validation("message is required".into()));
                }
                handle.chat(&message)?;
                Prepared::Done(CommandOutcome::done("Message sent"))
            }
            Command::Attack => match handle.nearest_entity() {
                Some(target) => self.pending(handle, PendingAction::Attack(target)),
                None => Prepared::Done(CommandOutcome::NothingToAttack),
            },
            Command::Inventory => Prepared::Done(CommandOutcome::Inventory(handle.inventory())),
            Command::Swap { from_slot, to_slot } => {
                let (from, to) = (inventory_slot(from_slot)?, inventory_slot(to_slot)?);
                let message = format!("Swapped slot {from} with slot {to}");
                self.pending(handle, PendingAction::Swap { from, to, message })
            }
            Command::Equip { slot } => {
                let slot = inventory_slot(slot)?;
                if slot < HOTBAR_SLOTS {
                    handle.select_hotbar(slot)?;
                    Prepared::Done(CommandOutcome::done(format!("Selected hotbar slot {slot}")))
                } else {
                    let to = handle.inventory().selected_hotbar;
                    let message = format!("Moved item from slot {slot} to hotbar slot {to}");
                    self.pending(handle, PendingAction::Swap { from: slot, to, message })
                }
            }
            Command::Place { x, y, z, block_name } => {
                if block_name.trim().is_empty() {
                    return Err(FleetError::Validation("x, y, z, and blockName required".into()));
                }
                let against = block_pos(x, y, z);
                if handle.block_at(against).is_none() {
                    return Err(FleetError::ExternalAction("Invalid block at position".into()));
                }
                self.pending(handle, PendingAction::Place { against, block_name })
            }
            Command::Dig { x, y, z } => {
                let pos = block_pos(x, y, z);
                if handle.block_at(pos).is_none() {
                    return Err(FleetError::ExternalAction("Invalid block at position".into()));
                }
                self.pending(handle, PendingAction::Dig(pos))
            }
            Command::Use => {
                handle.activate_item()?;
                Prepared::Done(CommandOutcome::done("Item activated"))
            }
            Command::Respawn => Prepared::Done(self.force_respawn()?),
        };
        Ok(prepared)
    }

    fn pending(&self, handle: Arc<dyn GameHandle>, action: PendingAction) -> Prepared {
        Prepared::Pending {
            handle,
            generation: self.generation,
            action,
        }
    }

    fn force_respawn(&mut self) -> Result<CommandOutcome, FleetError> {
        let handle = match (&self.handle, self.record.status) {
            (Some(h), s) if s.holds_handle() && s != SessionStatus::Connecting => h.clone(),
            _ => return Err(FleetError::not_connected()),
        };
        if !self.can_respawn {
            return Err(FleetError::Precondition("respawn is not available for this connection".into()));
        }
        handle.respawn()?;
        info!(session_id = %self.record.id, "manual respawn requested");
        Ok(CommandOutcome::done("Respawn command sent"))
    }

    // ── helpers ─────────────────────────────────────────────────────────

    fn set_status(&mut self, rt: &Runtime, status: SessionStatus) {
        if self.record.status != status {
            debug!(session_id = %self.record.id, from = %self.record.status, to = %status, "status change");
        }
        self.record.status = status;
        self.persist(rt);
        self.notify(rt);
    }

    pub fn persist(&self, rt: &Runtime) {
        if let Err(e) = rt.store.save(&self.record) {
            error!(session_id = %self.record.id, error = %e, "failed to persist session");
        }
    }

    pub fn notify(&self, rt: &Runtime) {
        let _ = rt.events.send(FleetEvent::Status(self.snapshot()));
    }

    fn take_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn schedule(&mut self, rt: &Runtime, delay: Duration, kind: TimerKind) -> Scheduled {
        let token = self.take_token();
        let tx = rt.tx.clone();
        let session_id = self.record.id.clone();
        let action = DeferredAction::once(delay, move || {
            let _ = tx.send(Dispatch::Timer { session_id, token, kind });
        });
        Scheduled { token, _action: action }
    }

    /// Whether `token` is still the live timer for `kind`. One-shot slots are
    /// emptied on success.
    fn claim(&mut self, kind: TimerKind, token: u64) -> bool {
        let slot = match kind {
            TimerKind::Reconnect => &mut self.reconnect,
            TimerKind::SpawnCheck => &mut self.spawn_check,
            TimerKind::ClearControls => &mut self.clear_controls,
            TimerKind::StartIdle => &mut self.idle_start,
            TimerKind::IdleRelease => &mut self.idle_release,
            TimerKind::IdleTick => return self.idle.as_ref().is_some_and(|s| s.token == token),
            TimerKind::Release(control) => {
                let live = self.releases.get(&control).is_some_and(|s| s.token == token);
                if live {
                    self.releases.remove(&control);
                }
                return live;
            }
        };
        if slot.as_ref().is_some_and(|s| s.token == token) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

fn inventory_slot(slot: i64) -> Result<u8, FleetError> {
    u8::try_from(slot)
        .ok()
        .filter(|s| *s < INVENTORY_SLOTS)
        .ok_or_else(|| FleetError::Precondition("Invalid slot number (0-35)".into()))
}
