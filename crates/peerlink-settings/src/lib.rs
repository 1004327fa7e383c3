//! # peerlink-settings
//!
//! Configuration for the peerlink signaling service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`PeerlinkSettings::default()`])
//! 2. **User file** `~/.peerlink/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `PEERLINK_*` (plus the legacy `WS_PORT` and
//!    `ENV`), highest priority
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
