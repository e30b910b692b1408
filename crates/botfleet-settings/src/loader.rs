//! Settings loading.
//!
//! Loading flow:
//! 1. Start with compiled [`FleetSettings::default()`]
//! 2. Merge the JSON settings file if present
//! 3. Merge `BOTFLEET_<SECTION>__<KEY>` environment variables
//! 4. Validate ranges

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::FleetSettings;

pub const ENV_PREFIX: &str = "BOTFLEET_";

/// `~/.botfleet`
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".botfleet")
}

/// `~/.botfleet/settings.json`
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

pub fn load_settings() -> Result<FleetSettings> {
    load_settings_from_path(&settings_path())
}

/// Load with `path` as the file layer. A missing file is skipped; a file
/// with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FleetSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }
    let settings: FleetSettings = figment(path).extract()?;
    validate(&settings)?;
    Ok(settings)
}

fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(FleetSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

fn validate(s: &FleetSettings) -> Result<()> {
    let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));
    if s.server.max_send_queue == 0 {
        return invalid("server.max_send_queue must be at least 1");
    }
    if s.server.heartbeat_interval_secs == 0 {
        return invalid("server.heartbeat_interval_secs must be at least 1");
    }
    if s.server.client_timeout_secs <= s.server.heartbeat_interval_secs {
        return invalid("server.client_timeout_secs must exceed the heartbeat interval");
    }
    if s.server.status_tick_secs == 0 {
        return invalid("server.status_tick_secs must be at least 1");
    }
    if s.lifecycle.idle_interval_ms == 0 {
        return invalid("lifecycle.idle_interval_ms must be at least 1");
    }
    if s.world.scan_stride <= 0 || s.world.scan_radius < 0 {
        return invalid("world.scan_stride must be positive and world.scan_radius non-negative");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_gives_defaults() {
        Jail::expect_with(|jail| {
            let s = load_settings_from_path(&jail.directory().join("absent.json")).unwrap();
            assert_eq!(s, FleetSettings::default());
            Ok(())
        });
    }

    #[test]
    fn file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{"server": {"port": 12000}, "lifecycle": {"reconnect_delay_ms": 2500}}"#,
            )?;
            let s = load_settings_from_path(Path::new("settings.json")).unwrap();
            assert_eq!(s.server.port, 12000);
            assert_eq!(s.server.host, "0.0.0.0");
            assert_eq!(s.lifecycle.reconnect_delay_ms, 2500);
            assert_eq!(s.lifecycle.idle_interval_ms, 20_000);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", r#"{"server": {"port": 12000}}"#)?;
            jail.set_env("BOTFLEET_SERVER__PORT", "13000");
            jail.set_env("BOTFLEET_LOGGING__JSON", "false");
            jail.set_env("BOTFLEET_STORAGE__DB_PATH", "/var/lib/botfleet/fleet.db");
            let s = load_settings_from_path(Path::new("settings.json")).unwrap();
            assert_eq!(s.server.port, 13000);
            assert!(!s.logging.json);
            assert_eq!(s.storage.db_path, "/var/lib/botfleet/fleet.db");
            Ok(())
        });
    }

    #[test]
    fn invalid_json_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", "{not json")?;
            let err = load_settings_from_path(Path::new("settings.json")).unwrap_err();
            assert!(matches!(err, SettingsError::Load(_)));
            Ok(())
        });
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", r#"{"server": {"max_send_queue": 0}}"#)?;
            let err = load_settings_from_path(Path::new("settings.json")).unwrap_err();
            assert!(matches!(err, SettingsError::InvalidValue(_)));
            Ok(())
        });
    }

    #[test]
    fn file_from_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, r#"{"world": {"max_entities": 9}}"#).unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.world.max_entities, 9);
    }
}
