use std::time::Duration;

use botfleet_settings::ServerSettings;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub status_tick: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_send_queue: s.max_send_queue,
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(s.client_timeout_secs),
            status_tick: Duration::from_secs(s.status_tick_secs),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
