use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use botfleet_core::ids::ClientId;
use botfleet_engine::Fleet;
use botfleet_store::ServerHistoryRepo;

use crate::broadcaster::StatusBroadcaster;
use crate::client::{self, ClientRegistry};
use crate::config::ServerConfig;
use crate::routes;
use crate::ws;

/// Shared application state passed to handlers.
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Fleet>,
    pub history: ServerHistoryRepo,
    pub registry: Arc<ClientRegistry>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
    pub started_at: Instant,
    pub heartbeat: Duration,
    pub cancel: CancellationToken,
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::api_info))
        .route("/api", get(routes::api_info))
        .route("/health", get(routes::health))
        .route("/ping", get(routes::ping))
        .route("/ws", get(routes::ws_upgrade))
        .route("/sessions", get(routes::list_sessions).post(routes::create_session))
        .route("/sessions/{id}", get(routes::get_session).delete(routes::delete_session))
        .route("/sessions/{id}/world", get(routes::world))
        .route("/sessions/{id}/inventory", get(routes::inventory))
        .route("/sessions/{id}/inventory/{op}", post(routes::inventory_action))
        .route("/sessions/{id}/{action}", post(routes::session_action))
        .route("/servers", get(routes::list_servers))
        .route("/servers/{key}", delete(routes::delete_server))
        .fallback(routes::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, then serve the control surface and push channel until `cancel`
/// fires.
pub async fn start(
    config: ServerConfig,
    fleet: Arc<Fleet>,
    history: ServerHistoryRepo,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let broadcaster = Arc::new(StatusBroadcaster::new(Arc::clone(&registry), Arc::clone(&fleet)));
    let broadcast_task = Arc::clone(&broadcaster).start(fleet.subscribe(), config.status_tick, cancel.clone());

    let cleanup_task = client::start_cleanup_task(
        Arc::clone(&registry),
        config.heartbeat_interval,
        config.client_timeout,
        cancel.clone(),
    );

    let (message_tx, message_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let state = AppState {
        fleet,
        history,
        registry,
        broadcaster,
        message_tx,
        started_at: Instant::now(),
        heartbeat: config.heartbeat_interval,
        cancel: cancel.clone(),
    };
    let message_task = tokio::spawn(ws::process_messages(message_rx, state.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "botfleet server listening");

    let router = build_router(state);
    let serve_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        addr,
        tasks: vec![server_task, broadcast_task, cleanup_task, message_task],
    })
}

/// Handle returned by `start()`; owns the background tasks.
pub struct ServerHandle {
    pub addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Background tasks, for a graceful shutdown to wait on.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}
