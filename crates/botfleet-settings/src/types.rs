use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    pub server: ServerSettings,
    pub lifecycle: LifecycleSettings,
    pub world: WorldSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// HTTP and push-channel settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-subscriber outbound queue depth.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Subscribers silent for longer than this are pruned.
    pub client_timeout_secs: u64,
    /// Interval of the full status re-broadcast.
    pub status_tick_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            status_tick_secs: 5,
        }
    }
}

/// Session lifecycle timings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub reconnect_delay_ms: u64,
    pub idle_interval_ms: u64,
    pub idle_pulse_ms: u64,
    pub settle_delay_ms: u64,
    pub spawn_check_delay_ms: u64,
    pub respawn_retry_delay_ms: u64,
    pub max_respawn_retries: u32,
    pub control_clear_delay_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 10_000,
            idle_interval_ms: 20_000,
            idle_pulse_ms: 200,
            settle_delay_ms: 1_000,
            spawn_check_delay_ms: 500,
            respawn_retry_delay_ms: 5_000,
            max_respawn_retries: 3,
            control_clear_delay_ms: 200,
        }
    }
}

impl LifecycleSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn idle_pulse(&self) -> Duration {
        Duration::from_millis(self.idle_pulse_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn spawn_check_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_check_delay_ms)
    }

    pub fn respawn_retry_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_retry_delay_ms)
    }

    pub fn control_clear_delay(&self) -> Duration {
        Duration::from_millis(self.control_clear_delay_ms)
    }
}

/// Bounds of the world snapshot scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    pub scan_radius: i32,
    pub scan_stride: i32,
    pub max_blocks: usize,
    pub entity_radius: f64,
    pub max_entities: usize,
    /// Snapshots requested faster than this are served from cache.
    pub min_interval_ms: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            scan_radius: 8,
            scan_stride: 3,
            max_blocks: 100,
            entity_radius: 16.0,
            max_entities: 5,
            min_interval_ms: 250,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: crate::loader::settings_dir().join("botfleet.db").to_string_lossy().into_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
