//! HTTP control surface and WebSocket push channel for a bot fleet.

pub mod api_error;
pub mod broadcaster;
pub mod client;
pub mod config;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod ws;

pub use broadcaster::StatusBroadcaster;
pub use config::ServerConfig;
pub use server::{build_router, start, AppState, ServerHandle};
pub use shutdown::ShutdownCoordinator;
