//! # parley-settings
//!
//! Layered configuration for the parley runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **User file**: `~/.parley/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `PARLEY_*` overrides
//!
//! There is no global instance. Hosts load once and hand the relevant
//! sections to each component's constructor.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
