//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `TOOTLINE_*` environment variable overrides
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{Settings, MAX_FETCH_LIMIT};

/// Resolve the settings file: `$XDG_CONFIG_HOME/tootline/settings.json`,
/// falling back to `~/.config/tootline/settings.json`.
pub fn settings_path() -> PathBuf {
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    config_dir.join("tootline").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let mut settings = read_settings_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

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

    let token = merged
        .pointer("/instance/accessToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.to_string()));

    let mut settings: Settings = serde_json::from_value(merged)?;
    settings.instance.access_token = token;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides to loaded settings.
///
/// Each variable has strict parsing rules; an invalid value is logged and
/// ignored, leaving the file/default value in place.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (the environment, in production).
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("TOOTLINE_INSTANCE") {
        settings.instance.base_url = v;
    }
    if let Some(v) = env.string("TOOTLINE_ACCESS_TOKEN") {
        settings.instance.access_token = Some(SecretString::from(v));
    }
    if let Some(v) = env.string("TOOTLINE_STREAMING_URL") {
        settings.instance.streaming_url = Some(v);
    }

    if let Some(v) = env.u64("TOOTLINE_REFRESH", 0, 86_400) {
        settings.timeline.refresh_secs = v;
    }
    if let Some(v) = env.bool("TOOTLINE_STREAMING") {
        settings.timeline.streaming = v;
    }
    if let Some(v) = env.u64("TOOTLINE_FETCH_LIMIT", 1, u64::from(MAX_FETCH_LIMIT)) {
        settings.timeline.fetch_limit = v as u32;
    }

    if let Some(v) = env.u64("TOOTLINE_STREAM_BACKOFF", 1, 3_600) {
        settings.stream.backoff_secs = v;
    }
    if let Some(v) = env.u64("TOOTLINE_STREAM_READ_TIMEOUT", 5, 3_600) {
        settings.stream.read_timeout_secs = v;
    }

    if let Some(v) = env.string("TOOTLINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TOOTLINE_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.string("TOOTLINE_LOG_FILE") {
        settings.logging.file = Some(v);
    }
}

/// Check the fully layered settings. Run again after command-line flags are
/// applied, since those bypass the env parsing ranges.
pub fn validate(settings: &Settings) -> Result<()> {
    let base = settings.instance.base_url.trim();
    if base.is_empty() {
        return Err(SettingsError::InvalidValue {
            key: "instance.baseUrl",
            reason: "is empty".to_string(),
        });
    }
    if !(base.starts_with("https://") || base.starts_with("http://")) {
        return Err(SettingsError::InvalidValue {
            key: "instance.baseUrl",
            reason: format!("must be http(s), got {base}"),
        });
    }
    let limit = settings.timeline.fetch_limit;
    if !(1..=MAX_FETCH_LIMIT).contains(&limit) {
        return Err(SettingsError::InvalidValue {
            key: "timeline.fetchLimit",
            reason: format!("must be between 1 and {MAX_FETCH_LIMIT}, got {limit}"),
        });
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
