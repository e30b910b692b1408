//! Session registry and the dispatcher that serializes lifecycle callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use botfleet_core::client::{GameConnector, GameHandle};
use botfleet_core::events::FleetEvent;
use botfleet_core::status::SessionConfig;
use botfleet_core::store::SessionStore;
use botfleet_core::world::{WorldSnapshot, WorldSnapshotProvider};
use botfleet_core::{FleetError, SessionId, SessionSnapshot, SessionStatus};
use botfleet_settings::LifecycleSettings;

use crate::commands::{Command, CommandOutcome};
use crate::session::{Dispatch, PendingAction, Prepared, Runtime, Session};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FleetCounts {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub reconnecting: usize,
}

/// Collaborators a fleet is built from.
pub struct FleetDeps {
    pub connector: Arc<dyn GameConnector>,
    pub store: Arc<dyn SessionStore>,
    pub world: Arc<dyn WorldSnapshotProvider>,
    pub events: broadcast::Sender<FleetEvent>,
    pub timings: LifecycleSettings,
}

/// Registry of managed sessions.
///
/// API calls and dispatched callbacks take the registry lock for the
/// duration of one transition and never across an await.
pub struct Fleet {
    sessions: Mutex<HashMap<SessionId, Session>>,
    rt: Runtime,
    world: Arc<dyn WorldSnapshotProvider>,
    cancel: CancellationToken,
}

impl Fleet {
    /// Build the fleet and spawn its dispatcher task.
    pub fn start(deps: FleetDeps) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fleet = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            rt: Runtime {
                connector: deps.connector,
                store: deps.store,
                events: deps.events,
                tx,
                timings: deps.timings,
            },
            world: deps.world,
            cancel: CancellationToken::new(),
        });
        let handle = tokio::spawn(run_dispatcher(Arc::downgrade(&fleet), rx, fleet.cancel.clone()));
        (fleet, handle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.rt.events.subscribe()
    }

    /// Validate, persist, and begin connecting a new session.
    pub fn create(&self, config: SessionConfig) -> Result<SessionSnapshot, FleetError> {
        let record = config.into_record(SessionId::new(), Utc::now())?;
        let id = record.id.clone();
        info!(
            session_id = %id,
            name = %record.display_name,
            target = %format!("{}:{}", record.target_host, record.target_port),
            "creating session"
        );

        let mut sessions = self.sessions.lock();
        let session = sessions.entry(id).or_insert_with(|| Session::new(record));
        session.persist(&self.rt);
        session.connect(&self.rt);
        Ok(session.snapshot())
    }

    /// Load persisted records. Sessions stored as connected or reconnecting
    /// are connected again; the rest keep their stored status.
    pub fn restore(&self) -> Result<usize, FleetError> {
        let records = self
            .rt
            .store
            .load_all()
            .map_err(|e| FleetError::Collaborator(e.to_string()))?;

        let mut sessions = self.sessions.lock();
        let mut resumed = 0;
        for record in records {
            if sessions.contains_key(&record.id) {
                continue;
            }
            let resume = record.status.resumes_on_startup();
            let id = record.id.clone();
            let session = sessions.entry(id.clone()).or_insert_with(|| Session::new(record));
            if resume {
                info!(session_id = %id, "resuming session");
                session.connect(&self.rt);
                resumed += 1;
            } else {
                debug!(session_id = %id, status = %session.record().status, "restored idle session");
            }
        }
        info!(total = sessions.len(), resumed, "sessions restored");
        Ok(resumed)
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionSnapshot, FleetError> {
        self.sessions
            .lock()
            .get(id)
            .map(Session::snapshot)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))
    }

    /// Every session, oldest first.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self.sessions.lock().values().map(Session::snapshot).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn counts(&self) -> FleetCounts {
        let sessions = self.sessions.lock();
        let mut counts = FleetCounts {
            total: sessions.len(),
            ..Default::default()
        };
        for s in sessions.values() {
            match s.record().status {
                SessionStatus::Connected => counts.connected += 1,
                SessionStatus::Reconnecting => counts.reconnecting += 1,
                SessionStatus::Disconnected | SessionStatus::Kicked | SessionStatus::Error => {
                    counts.disconnected += 1
                }
                _ => {}
            }
        }
        counts
    }

    /// Stop the session and remove it and its record. Ids are never reused.
    pub fn delete(&self, id: &SessionId) -> Result<(), FleetError> {
        {
            let mut sessions = self.sessions.lock();
            let session = sessions.get_mut(id).ok_or_else(|| FleetError::NotFound(id.to_string()))?;
            session.halt();
            sessions.remove(id);
        }
        if let Err(e) = self.rt.store.remove(id) {
            error!(session_id = %id, error = %e, "failed to remove session record");
        }
        self.world.forget(id);
        let _ = self.rt.events.send(FleetEvent::Deleted { session_id: id.clone() });
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Run one command. Fails fast when the session is not ready.
    pub async fn execute(&self, id: &SessionId, command: Command) -> Result<CommandOutcome, FleetError> {
        let kind = command.kind();
        let result = match self.prepare(id, command) {
            Ok(Prepared::Done(outcome)) => Ok(outcome),
            Ok(Prepared::Pending {
                handle,
                generation,
                action,
            }) => self.perform(id, handle, generation, action).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => debug!(session_id = %id, command = kind, "command executed"),
            Err(e) => debug!(session_id = %id, command = kind, error = %e, "command refused"),
        }
        result
    }

    fn prepare(&self, id: &SessionId, command: Command) -> Result<Prepared, FleetError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id).ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        session.prepare(&self.rt, command)
    }

    /// Whether `generation` is still the live, connected handle of `id`.
    fn is_current(&self, id: &SessionId, generation: u64) -> bool {
        self.sessions
            .lock()
            .get(id)
            .is_some_and(|s| s.generation() == generation && s.live_handle().is_some())
    }

    /// Run an action prepared under the lock. A kick or delete landing
    /// after preparation is caught here; one landing mid-action is not.
    async fn perform(
        &self,
        id: &SessionId,
        handle: Arc<dyn GameHandle>,
        generation: u64,
        action: PendingAction,
    ) -> Result<CommandOutcome, FleetError> {
        if !self.is_current(id, generation) {
            return Err(FleetError::not_connected());
        }
        match action {
            PendingAction::Look { yaw, pitch } => handle
                .look(yaw, pitch)
                .await
                .map(|()| CommandOutcome::done(format!("Looking at yaw {yaw}, pitch {pitch}")))
                .map_err(FleetError::from),
            PendingAction::Attack(target) => handle
                .attack(target.entity.id)
                .await
                .map(|()| CommandOutcome::Attacked { target })
                .map_err(FleetError::from),
            PendingAction::Swap { from, to, message } => handle
                .swap_slots(from, to)
                .await
                .map(|()| CommandOutcome::done(message))
                .map_err(FleetError::from),
            PendingAction::Place { against, block_name } => handle
                .place_block(against, &block_name)
                .await
                .map(|()| CommandOutcome::done(format!("Placed {block_name}")))
                .map_err(FleetError::from),
            PendingAction::Dig(pos) => handle
                .dig(pos)
                .await
                .map(|()| CommandOutcome::done(format!("Dug block at {}, {}, {}", pos.x, pos.y, pos.z)))
                .map_err(FleetError::from),
        }
    }

    /// Bounded scan around a connected session.
    pub fn world_snapshot(&self, id: &SessionId) -> Result<WorldSnapshot, FleetError> {
        let handle = {
            let sessions = self.sessions.lock();
            let session = sessions.get(id).ok_or_else(|| FleetError::NotFound(id.to_string()))?;
            session.live_handle().ok_or_else(FleetError::not_connected)?
        };
        self.world.snapshot(id, handle.as_ref())
    }

    /// Detach every session without touching persisted records, then stop
    /// the dispatcher.
    pub fn shutdown(&self) {
        let mut sessions = self.sessions.lock();
        for session in sessions.values_mut() {
            session.halt();
        }
        self.cancel.cancel();
        info!(sessions = sessions.len(), "fleet shut down");
    }

    fn dispatch(&self, msg: Dispatch) {
        let mut sessions = self.sessions.lock();
        match msg {
            Dispatch::Game {
                session_id,
                generation,
                event,
            } => {
                let Some(session) = sessions.get_mut(&session_id) else {
                    debug!(%session_id, event = event.name(), "event for unknown session dropped");
                    return;
                };
                if session.generation() != generation {
                    debug!(%session_id, event = event.name(), generation, "stale event dropped");
                    return;
                }
                session.on_game_event(&self.rt, event);
            }
            Dispatch::Timer { session_id, token, kind } => {
                if let Some(session) = sessions.get_mut(&session_id) {
                    session.on_timer(&self.rt, token, kind);
                }
            }
        }
    }

    #[cfg(test)]
    fn with_session<T>(&self, id: &SessionId, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.sessions.lock().get(id).map(f)
    }
}

async fn run_dispatcher(fleet: Weak<Fleet>, mut rx: mpsc::UnboundedReceiver<Dispatch>, cancel: CancellationToken) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let Some(fleet) = fleet.upgrade() else {
            warn!("fleet dropped, dispatcher exiting");
            break;
        };
        fleet.dispatch(msg);
    }
    debug!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimConnector;
    use crate::world::ScanProvider;
    use botfleet_core::client::Control;
    use botfleet_core::store::MemoryStore;
    use botfleet_core::ConnectError;
    use botfleet_settings::WorldSettings;
    use std::time::Duration;

    struct Harness {
        fleet: Arc<Fleet>,
        sim: Arc<SimConnector>,
        store: Arc<MemoryStore>,
        events: broadcast::Receiver<FleetEvent>,
    }

    fn harness_with(sim: SimConnector, store: Arc<MemoryStore>) -> Harness {
        let sim = Arc::new(sim);
        let (tx, events) = broadcast::channel(1024);
        let (fleet, _) = Fleet::start(FleetDeps {
            connector: sim.clone(),
            store: store.clone(),
            world: Arc::new(ScanProvider::new(WorldSettings::default())),
            events: tx,
            timings: LifecycleSettings::default(),
        });
        Harness { fleet, sim, store, events }
    }

    fn harness() -> Harness {
        harness_with(SimConnector::new(), Arc::new(MemoryStore::new()))
    }

    /// Let the dispatcher drain queued callbacks.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn statuses(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<SessionStatus> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let FleetEvent::Status(s) = ev {
                out.push(s.status);
            }
        }
        out
    }

    fn config() -> SessionConfig {
        SessionConfig::new("Bot1", "h", 25565)
    }

    #[tokio::test(start_paused = true)]
    async fn create_login_kick_reconnect() {
        let mut h = harness();
        let snap = h.fleet.create(config()).unwrap();
        let id = snap.id.clone();
        assert_eq!(snap.status, SessionStatus::Connecting);
        assert_eq!(h.store.get(&id).unwrap().status, SessionStatus::Connecting);

        h.sim.last_handle().unwrap().login();
        settle().await;
        let snap = h.fleet.get(&id).unwrap();
        assert_eq!(snap.status, SessionStatus::Connected);
        assert_eq!(snap.connection_count, 1);
        assert!(snap.last_connected_at.is_some());
        statuses(&mut h.events);

        h.sim.last_handle().unwrap().kick("flying is not enabled");
        settle().await;
        assert_eq!(statuses(&mut h.events), [SessionStatus::Kicked, SessionStatus::Reconnecting]);
        let snap = h.fleet.get(&id).unwrap();
        assert!(snap.reconnecting);
        assert_eq!(h.sim.attempts().len(), 1);

        advance(9_999).await;
        assert!(h.fleet.get(&id).unwrap().reconnecting);
        assert_eq!(h.sim.attempts().len(), 1);

        advance(2).await;
        let snap = h.fleet.get(&id).unwrap();
        assert_eq!(snap.status, SessionStatus::Connecting);
        assert!(!snap.reconnecting);
        assert_eq!(h.sim.attempts().len(), 2);

        h.sim.last_handle().unwrap().login();
        settle().await;
        assert_eq!(h.fleet.get(&id).unwrap().connection_count, 2);
        assert_eq!(h.store.get(&id).unwrap().connection_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_disconnect_notifications_schedule_one_reconnect() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        settle().await;

        handle.emit_raw(botfleet_core::client::GameEvent::Kicked { reason: "bye".into() });
        handle.emit_raw(botfleet_core::client::GameEvent::Error { message: "reset".into() });
        handle.emit_raw(botfleet_core::client::GameEvent::End { reason: "socket closed".into() });
        settle().await;
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Reconnecting);

        advance(10_001).await;
        assert_eq!(h.sim.attempts().len(), 2);
        advance(30_000).await;
        assert_eq!(h.sim.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_guard_rejects_second_request() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        {
            let mut sessions = h.fleet.sessions.lock();
            let session = sessions.get_mut(&id).unwrap();
            session.schedule_reconnect(&h.fleet.rt);
            session.schedule_reconnect(&h.fleet.rt);
        }
        assert!(h.fleet.get(&id).unwrap().reconnecting);
        advance(10_001).await;
        assert!(!h.fleet.get(&id).unwrap().reconnecting);
        advance(30_000).await;
        assert_eq!(h.sim.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_live_handle() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        for _ in 0..3 {
            h.sim.last_handle().unwrap().login();
            settle().await;
            h.sim.last_handle().unwrap().end();
            settle().await;
            advance(10_001).await;
        }
        let handles = h.sim.handles();
        assert_eq!(handles.len(), 4);
        assert_eq!(handles.iter().filter(|h| !h.is_detached()).count(), 1);
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handle_events_are_ignored() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let old = h.sim.last_handle().unwrap();
        old.login();
        settle().await;
        old.kick("bye");
        settle().await;
        advance(10_001).await;

        old.emit_raw(botfleet_core::client::GameEvent::Login);
        old.emit_raw(botfleet_core::client::GameEvent::End { reason: "late".into() });
        settle().await;
        let snap = h.fleet.get(&id).unwrap();
        assert_eq!(snap.status, SessionStatus::Connecting);
        assert_eq!(snap.connection_count, 1);
        assert!(!snap.reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn version_ladder_updates_stored_version() {
        let sim = SimConnector::new();
        sim.reject_versions(&[Some("1.21.5"), Some("1.21"), Some("1.20.6")]);
        let h = harness_with(sim, Arc::new(MemoryStore::new()));

        let mut cfg = config();
        cfg.version = Some("1.21.5".into());
        let snap = h.fleet.create(cfg).unwrap();

        assert_eq!(
            h.sim.attempts(),
            [Some("1.21.5".to_string()), Some("1.21".into()), Some("1.20.6".into()), Some("1.20.4".into())]
        );
        assert_eq!(snap.protocol_version.as_deref(), Some("1.20.4"));
        assert_eq!(snap.status, SessionStatus::Connecting);
        assert_eq!(h.store.get(&snap.id).unwrap().protocol_version.as_deref(), Some("1.20.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_ladder_schedules_reconnect() {
        let sim = SimConnector::new();
        sim.reject_versions(&[Some("1.21.5"), Some("1.21"), Some("1.20.6"), Some("1.20.4"), Some("1.20.1"), None]);
        let h = harness_with(sim, Arc::new(MemoryStore::new()));
        let mut cfg = config();
        cfg.version = Some("1.21.5".into());
        let snap = h.fleet.create(cfg).unwrap();

        assert_eq!(h.sim.attempts().len(), 6);
        assert_eq!(h.sim.attempts().last(), Some(&None));
        assert_eq!(snap.status, SessionStatus::Reconnecting);
        assert!(snap.reconnecting);
        assert_eq!(snap.protocol_version.as_deref(), Some("1.21.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_detect_success_keeps_stored_version() {
        let sim = SimConnector::new();
        sim.reject_versions(&[Some("1.21.5"), Some("1.21"), Some("1.20.6"), Some("1.20.4"), Some("1.20.1")]);
        let h = harness_with(sim, Arc::new(MemoryStore::new()));
        let mut cfg = config();
        cfg.version = Some("1.21.5".into());
        let snap = h.fleet.create(cfg).unwrap();
        assert_eq!(snap.status, SessionStatus::Connecting);
        assert_eq!(snap.protocol_version.as_deref(), Some("1.21.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_version_failure_skips_ladder() {
        let sim = SimConnector::new();
        sim.fail_next(ConnectError::Failed("ECONNREFUSED".into()));
        let h = harness_with(sim, Arc::new(MemoryStore::new()));
        let snap = h.fleet.create(config()).unwrap();
        assert_eq!(h.sim.attempts().len(), 1);
        assert_eq!(snap.status, SessionStatus::Reconnecting);

        advance(10_001).await;
        assert_eq!(h.fleet.get(&snap.id).unwrap().status, SessionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn death_then_respawn_restarts_idle_without_reconnect() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        handle.spawn();
        settle().await;
        advance(1_001).await;
        assert!(h.fleet.with_session(&id, Session::is_idle_running).unwrap());

        handle.die();
        settle().await;
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Dead);
        assert!(!h.fleet.with_session(&id, Session::is_idle_running).unwrap());
        assert!(handle.pressed().is_empty());

        handle.revive();
        settle().await;
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Respawning);
        advance(501).await;
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Connected);
        advance(1_001).await;
        assert!(h.fleet.with_session(&id, Session::is_idle_running).unwrap());

        assert_eq!(h.sim.attempts().len(), 1);
        assert!(!h.fleet.get(&id).unwrap().reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_dead_retries_respawn_then_waits() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.set_revive_on_respawn(false);
        handle.login();
        handle.set_health(0.0);
        handle.spawn();
        settle().await;

        advance(501).await;
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Dead);
        assert_eq!(handle.respawn_requests(), 1);

        advance(5_001).await;
        advance(5_001).await;
        advance(5_001).await;
        advance(5_001).await;
        assert_eq!(handle.respawn_requests(), 3);
        assert_eq!(h.fleet.get(&id).unwrap().status, SessionStatus::Dead);
        assert_eq!(h.sim.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn respawn_retries_stay_bounded_when_each_request_spawns_again() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.set_revive_on_respawn(false);
        handle.login();
        handle.set_health(0.0);
        handle.spawn();
        settle().await;

        let mut seen = 0;
        for _ in 0..20 {
            advance(600).await;
            let requests = handle.respawn_requests();
            if requests > seen {
                seen = requests;
                handle.spawn();
                settle().await;
            }
        }
        assert_eq!(handle.respawn_requests(), 3);
        let snap = h.fleet.get(&id).unwrap();
        assert_eq!(snap.status, SessionStatus::Dead);
        assert!(!snap.reconnecting);
        assert_eq!(h.sim.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnects_stop_the_idle_task() {
        for cause in ["kick", "error", "end"] {
            let h = harness();
            let id = h.fleet.create(config()).unwrap().id;
            let handle = h.sim.last_handle().unwrap();
            handle.login();
            settle().await;
            advance(1_001).await;
            assert!(h.fleet.with_session(&id, Session::is_idle_running).unwrap(), "{cause}");

            match cause {
                "kick" => handle.kick("bye"),
                "error" => handle.error("connection reset"),
                _ => handle.end(),
            }
            settle().await;
            assert!(!h.fleet.with_session(&id, Session::is_idle_running).unwrap(), "{cause}");
            assert!(handle.is_detached(), "{cause}");

            advance(60_000).await;
            assert_eq!(handle.presses_of(Control::Jump), 0, "{cause}");
            assert!(!h.fleet.with_session(&id, Session::is_idle_running).unwrap(), "{cause}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_task_pulses_jump() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        settle().await;
        advance(1_001).await;
        assert!(h.fleet.with_session(&id, Session::is_idle_running).unwrap());

        advance(20_000).await;
        assert!(handle.pressed().contains(&Control::Jump));
        advance(201).await;
        assert!(!handle.pressed().contains(&Control::Jump));
        assert_eq!(handle.presses_of(Control::Jump), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn move_requires_connected_and_alive() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        let mv = || Command::Move { action: "forward".into(), duration_ms: 500 };

        let err = h.fleet.execute(&id, mv()).await.unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));

        handle.login();
        settle().await;
        handle.set_health(0.0);
        let err = h.fleet.execute(&id, mv()).await.unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));
        assert!(handle.control_log().is_empty());

        handle.set_health(20.0);
        h.fleet.execute(&id, mv()).await.unwrap();
        assert!(handle.pressed().contains(&Control::Forward));
        advance(501).await;
        assert!(!handle.pressed().contains(&Control::Forward));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_action_is_precondition() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        h.sim.last_handle().unwrap().login();
        settle().await;
        let err = h
            .fleet
            .execute(&id, Command::Move { action: "fly".into(), duration_ms: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_against_live_world() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        settle().await;

        let out = h.fleet.execute(&id, Command::Inventory).await.unwrap();
        let CommandOutcome::Inventory(inv) = out else {
            panic!("expected inventory, got {out:?}");
        };
        assert_eq!(inv.slots.len(), 36);

        h.fleet.execute(&id, Command::Equip { slot: 3 }).await.unwrap();
        assert_eq!(handle.inventory_view().selected_hotbar, 3);
        h.fleet.execute(&id, Command::Equip { slot: 10 }).await.unwrap();
        assert_eq!(handle.inventory_view().slots[3].as_ref().map(|i| i.name.as_str()), Some("bread"));
        let err = h.fleet.execute(&id, Command::Equip { slot: 36 }).await.unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));

        let out = h.fleet.execute(&id, Command::Attack).await.unwrap();
        assert!(matches!(out, CommandOutcome::Attacked { .. }));
        handle.set_entities(Vec::new());
        let out = h.fleet.execute(&id, Command::Attack).await.unwrap();
        assert_eq!(out, CommandOutcome::NothingToAttack);

        let err = h
            .fleet
            .execute(&id, Command::Dig { x: 0.0, y: 400.0, z: 0.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::ExternalAction(_)));
        h.fleet
            .execute(&id, Command::Dig { x: 0.0, y: 63.0, z: 0.0 })
            .await
            .unwrap();

        h.fleet.execute(&id, Command::Chat { message: "hi".into() }).await.unwrap();
        assert_eq!(handle.chat_log(), ["hi"]);
        h.fleet.execute(&id, Command::Use).await.unwrap();
        h.fleet.execute(&id, Command::Look { yaw: 1.0, pitch: 0.5 }).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn force_respawn_depends_on_capability() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        handle.die();
        settle().await;
        h.fleet.execute(&id, Command::Respawn).await.unwrap();
        assert_eq!(handle.respawn_requests(), 1);

        let sim = SimConnector::new();
        sim.set_respawn_supported(false);
        let h = harness_with(sim, Arc::new(MemoryStore::new()));
        let id = h.fleet.create(config()).unwrap().id;
        h.sim.last_handle().unwrap().login();
        settle().await;
        let err = h.fleet.execute(&id, Command::Respawn).await.unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_stops_everything() {
        let mut h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        settle().await;
        advance(1_001).await;

        h.fleet.delete(&id).unwrap();
        assert!(handle.is_detached());
        assert!(h.fleet.list().is_empty());
        assert!(h.store.get(&id).is_none());
        assert!(matches!(h.fleet.delete(&id), Err(FleetError::NotFound(_))));
        assert!(matches!(h.fleet.get(&id), Err(FleetError::NotFound(_))));

        let mut deleted = false;
        while let Ok(ev) = h.events.try_recv() {
            deleted |= matches!(ev, FleetEvent::Deleted { ref session_id } if *session_id == id);
        }
        assert!(deleted);

        advance(60_000).await;
        assert_eq!(handle.presses_of(Control::Jump), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_cancels_pending_spawn_check() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.set_revive_on_respawn(false);
        handle.login();
        handle.set_health(0.0);
        handle.spawn();
        settle().await;

        h.fleet.delete(&id).unwrap();
        assert!(handle.is_detached());
        advance(30_000).await;
        assert_eq!(handle.respawn_requests(), 0);
        assert_eq!(h.sim.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prepared_action_is_refused_once_the_handle_is_replaced() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        settle().await;

        let Prepared::Pending { handle: target, generation, action } = h.fleet.prepare(&id, Command::Attack).unwrap()
        else {
            panic!("attack should run against the handle");
        };
        handle.kick("bye");
        settle().await;
        let err = h.fleet.perform(&id, target, generation, action).await.unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));
        assert!(handle.attacked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prepared_action_is_refused_after_delete() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        let handle = h.sim.last_handle().unwrap();
        handle.login();
        settle().await;

        let Prepared::Pending { handle: target, generation, action } = h.fleet.prepare(&id, Command::Attack).unwrap()
        else {
            panic!("attack should run against the handle");
        };
        h.fleet.delete(&id).unwrap();
        let err = h.fleet.perform(&id, target, generation, action).await.unwrap_err();
        assert!(matches!(err, FleetError::Precondition(_)));
        assert!(handle.attacked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_during_reconnect_cancels_it() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        h.sim.last_handle().unwrap().kick("bye");
        settle().await;
        h.fleet.delete(&id).unwrap();
        advance(20_000).await;
        assert_eq!(h.sim.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_resumes_only_live_statuses() {
        let store = Arc::new(MemoryStore::new());
        {
            let h = harness_with(SimConnector::new(), store.clone());
            let a = h.fleet.create(SessionConfig::new("A", "h", 1)).unwrap().id;
            let _b = h.fleet.create(SessionConfig::new("B", "h", 2)).unwrap().id;
            h.sim.handles()[0].login();
            settle().await;
            assert_eq!(store.get(&a).unwrap().status, SessionStatus::Connected);
            h.sim.handles()[1].error("boom");
            settle().await;
            h.fleet.shutdown();
        }
        assert_eq!(store.len(), 2);

        let h = harness_with(SimConnector::new(), store.clone());
        assert_eq!(h.fleet.restore().unwrap(), 2);
        assert_eq!(h.sim.attempts().len(), 2);
        let list = h.fleet.list();
        assert_eq!(list[0].display_name, "A");
        assert_eq!(list[0].connection_count, 1);
        assert!(list.iter().all(|s| s.status == SessionStatus::Connecting));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_keeps_idle_statuses() {
        let store = Arc::new(MemoryStore::new());
        let mut rec = config().into_record(SessionId::new(), Utc::now()).unwrap();
        rec.status = SessionStatus::Kicked;
        store.save(&rec).unwrap();

        let h = harness_with(SimConnector::new(), store);
        assert_eq!(h.fleet.restore().unwrap(), 0);
        assert_eq!(h.fleet.get(&rec.id).unwrap().status, SessionStatus::Kicked);
        assert!(h.sim.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn world_snapshot_requires_connection() {
        let h = harness();
        let id = h.fleet.create(config()).unwrap().id;
        assert!(matches!(h.fleet.world_snapshot(&id), Err(FleetError::Precondition(_))));
        h.sim.last_handle().unwrap().login();
        settle().await;
        let snap = h.fleet.world_snapshot(&id).unwrap();
        assert!(!snap.blocks.is_empty());
        assert!(snap.blocks.len() <= 100);
        assert!(matches!(h.fleet.world_snapshot(&SessionId::new()), Err(FleetError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn counts_by_status() {
        let h = harness();
        h.fleet.create(config()).unwrap();
        h.fleet.create(config()).unwrap();
        h.sim.handles()[0].login();
        h.sim.handles()[1].kick("bye");
        settle().await;
        assert_eq!(
            h.fleet.counts(),
            FleetCounts { total: 2, connected: 1, disconnected: 0, reconnecting: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_validates() {
        let h = harness();
        let err = h.fleet.create(SessionConfig::default()).unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));
        assert!(h.store.is_empty());
        assert!(h.sim.attempts().is_empty());
    }
}
