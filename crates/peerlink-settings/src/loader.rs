//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PeerlinkSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{Environment, PeerlinkSettings};

/// The peerlink data directory (`~/.peerlink`).
pub fn peerlink_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".peerlink")
}

/// Resolve the path to the settings file (`~/.peerlink/settings.json`).
pub fn settings_path() -> PathBuf {
    peerlink_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PeerlinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PeerlinkSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Load settings reading environment values through `env`.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<PeerlinkSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults =
        serde_json::to_value(PeerlinkSettings::default()).map_err(SettingsError::Schema)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PeerlinkSettings =
        serde_json::from_value(merged).map_err(SettingsError::Schema)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `env`.
///
/// Invalid values are logged and ignored (fall back to file/default). Where
/// both a `PEERLINK_*` name and a legacy name exist, the `PEERLINK_*` one wins.
pub fn apply_env_overrides<F>(settings: &mut PeerlinkSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PEERLINK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env
        .u16("PEERLINK_PORT", 1, 65535)
        .or_else(|| env.u16("WS_PORT", 1, 65535))
    {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("PEERLINK_MAX_MESSAGE_SIZE", 1024, 16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.usize("PEERLINK_QUEUE_CAPACITY", 1, 65_536) {
        settings.server.outbound_queue_capacity = v;
    }
    if let Some(v) = env.u64("PEERLINK_PING_INTERVAL_SECS", 1, 3600) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = env.u64("PEERLINK_READ_DEADLINE_SECS", 1, 3600) {
        settings.server.read_deadline_secs = v;
    }
    if let Some(v) = env.u64("PEERLINK_WRITE_TIMEOUT_SECS", 1, 600) {
        settings.server.write_timeout_secs = v;
    }

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = env.string("PEERLINK_DB_PATH") {
        settings.database.path = Some(PathBuf::from(v));
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PEERLINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env
        .environment("PEERLINK_ENV")
        .or_else(|| env.environment("ENV"))
    {
        settings.logging.environment = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F>(F);

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid {kind} env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn environment(&self, name: &str) -> Option<Environment> {
        self.parsed(name, "environment", Environment::parse)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
