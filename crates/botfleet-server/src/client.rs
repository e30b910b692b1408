use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use botfleet_core::ids::{ClientId, SessionId};

/// A connected push-channel subscriber.
pub struct Client {
    pub id: ClientId,
    /// Only messages about this session are delivered when set.
    filter: Mutex<Option<SessionId>>,
    tx: mpsc::Sender<String>,
    last_pong: Mutex<Instant>,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            filter: Mutex::new(None),
            tx,
            last_pong: Mutex::new(Instant::now()),
        }
    }

    pub fn filter(&self) -> Option<SessionId> {
        self.filter.lock().clone()
    }

    pub fn wants(&self, session_id: &SessionId) -> bool {
        self.filter.lock().as_ref().map_or(true, |f| f == session_id)
    }

    pub fn record_pong(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_pong.lock().elapsed() < timeout
    }
}

enum Delivery {
    Sent,
    Dropped,
    Closed,
}

/// Registry of all connected push-channel subscribers.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and return its id and outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        self.clients.insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Restrict a client to one session, or clear the restriction.
    pub fn set_filter(&self, id: &ClientId, session_id: Option<SessionId>) -> bool {
        match self.clients.get(id) {
            Some(client) => {
                *client.filter.lock() = session_id;
                true
            }
            None => false,
        }
    }

    pub fn filter_of(&self, id: &ClientId) -> Option<SessionId> {
        self.clients.get(id).and_then(|c| c.filter())
    }

    pub fn record_pong(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Send to one client, ignoring its filter. A closed client is pruned.
    pub fn send_to(&self, id: &ClientId, message: String) -> bool {
        let Some(client) = self.clients.get(id).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        match offer(&client, message) {
            Delivery::Sent => true,
            Delivery::Dropped => false,
            Delivery::Closed => {
                self.unregister(id);
                false
            }
        }
    }

    /// Deliver to every client whose filter admits `session_id`. Returns the
    /// number of clients that accepted the message.
    pub fn broadcast(&self, session_id: &SessionId, message: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.clients.iter() {
            let client = entry.value();
            if !client.wants(session_id) {
                continue;
            }
            match offer(client, message.to_owned()) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Closed => closed.push(client.id.clone()),
            }
        }
        for id in closed {
            self.unregister(&id);
            tracing::debug!(client_id = %id, "pruned closed client");
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that have not answered a ping within `timeout`.
    pub fn cleanup_dead_clients(&self, timeout: Duration) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

fn offer(client: &Client, message: String) -> Delivery {
    match client.tx.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            tracing::warn!(client_id = %client.id, msg_len = msg.len(), "send queue full, dropping message");
            Delivery::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Pump one WebSocket: outbound queue and pings on a writer task, inbound
/// text and pongs on a reader task. Returns when either side finishes.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
    heartbeat: Duration,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
                () = cancel.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_registry.record_pong(&reader_cid);
                    if on_message.send((reader_cid.clone(), text.to_string())).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_cid),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "push client disconnected");
}

/// Periodically prune clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_clients(timeout);
                    if removed > 0 {
                        tracing::info!(removed, "dead client cleanup");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}
