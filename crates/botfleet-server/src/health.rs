//! `/health` and `/ping` bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use botfleet_engine::FleetCounts;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the server answers.
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    /// Connected push clients.
    pub connections: usize,
    pub sessions: FleetCounts,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, sessions: FleetCounts) -> HealthResponse {
    HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        sessions,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingResponse {
    pub pong: bool,
    pub timestamp: DateTime<Utc>,
}

pub fn ping() -> PingResponse {
    PingResponse {
        pong: true,
        timestamp: Utc::now(),
    }
}
