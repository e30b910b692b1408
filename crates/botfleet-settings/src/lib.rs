//! # botfleet-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FleetSettings::default()`]
//! 2. **User file**: `~/.botfleet/settings.json`, or an explicit path
//! 3. **Environment variables**: `BOTFLEET_<SECTION>__<KEY>` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_dir, settings_path};
pub use types::*;
