use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use botfleet_core::events::FleetEvent;
use botfleet_core::SessionId;
use botfleet_engine::Fleet;

use crate::client::ClientRegistry;
use crate::ws::ServerMessage;

/// Fans fleet events out to push clients, and re-sends every session's
/// snapshot on a fixed tick. Best effort: nothing is retried.
pub struct StatusBroadcaster {
    registry: Arc<ClientRegistry>,
    fleet: Arc<Fleet>,
}

impl StatusBroadcaster {
    pub fn new(registry: Arc<ClientRegistry>, fleet: Arc<Fleet>) -> Self {
        Self { registry, fleet }
    }

    /// Deliver one event to every client whose filter admits it.
    pub fn publish(&self, event: &FleetEvent) -> usize {
        let Some(json) = ServerMessage::from(event).to_json() else {
            return 0;
        };
        let recipients = self.registry.broadcast(event.session_id(), &json);
        tracing::trace!(
            event_type = event.event_type(),
            session_id = %event.session_id(),
            recipients,
            "published"
        );
        recipients
    }

    /// Push the current snapshot of one session. Unknown ids are skipped.
    pub fn push_status(&self, session_id: &SessionId) -> usize {
        match self.fleet.get(session_id) {
            Ok(snapshot) => self.publish(&FleetEvent::Status(snapshot)),
            Err(_) => 0,
        }
    }

    /// Re-broadcast every session's snapshot.
    pub fn tick(&self) -> usize {
        self.fleet
            .list()
            .into_iter()
            .map(|snapshot| self.publish(&FleetEvent::Status(snapshot)))
            .sum()
    }

    /// Forward fleet events as they happen and run the periodic tick until
    /// cancelled or the event channel closes.
    pub fn start(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<FleetEvent>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => {
                            self.publish(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "status broadcaster lagged, dropped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("fleet event channel closed");
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        if self.registry.count() > 0 {
                            self.tick();
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
            tracing::debug!("status broadcaster stopped");
        })
    }
}
