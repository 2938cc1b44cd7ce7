//! # tootline-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`Settings::default()`])
//! 2. **User file** `~/.config/tootline/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `TOOTLINE_*` overrides
//!
//! Command-line flags sit above all three and are applied by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
    validate,
};
pub use types::*;
