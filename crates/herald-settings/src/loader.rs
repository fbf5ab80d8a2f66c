//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HeraldSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `HERALD_*` environment variable overrides
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{HeraldSettings, LogFormat};

/// Resolve the default settings path (`~/.herald/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `HERALD_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored (file/default value is kept).
pub fn apply_env_overrides<F>(settings: &mut HeraldSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("HERALD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("HERALD_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => tracing::warn!(key = "HERALD_PORT", value = %v, "invalid port, ignoring"),
        }
    }
    if let Some(v) = read("HERALD_IDENTITY_HEADER") {
        settings.server.identity_header = v.to_ascii_lowercase();
    }
    if let Some(v) = read("HERALD_REQUIRE_IDENTITY") {
        match parse_bool(&v) {
            Some(b) => settings.server.require_identity = b,
            None => {
                tracing::warn!(
                    key = "HERALD_REQUIRE_IDENTITY",
                    value = %v,
                    "invalid boolean, ignoring"
                );
            }
        }
    }
    if let Some(v) = read("HERALD_SUBSCRIBER_BUFFER") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 => settings.broker.subscriber_buffer = n,
            _ => {
                tracing::warn!(
                    key = "HERALD_SUBSCRIBER_BUFFER",
                    value = %v,
                    "invalid buffer size, ignoring"
                );
            }
        }
    }
    if let Some(v) = read("HERALD_CHANNELS") {
        settings.channels = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = read("HERALD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("HERALD_LOG_FORMAT") {
        match v.to_ascii_lowercase().as_str() {
            "json" => settings.logging.format = LogFormat::Json,
            "pretty" => settings.logging.format = LogFormat::Pretty,
            _ => {
                tracing::warn!(
                    key = "HERALD_LOG_FORMAT",
                    value = %v,
                    "invalid log format, ignoring"
                );
            }
        }
    }
}

/// Reject settings the server cannot start with.
pub fn validate(settings: &HeraldSettings) -> Result<()> {
    if settings.channels.is_empty() {
        return Err(SettingsError::InvalidValue("at least one channel is required".into()));
    }
    if settings.broker.subscriber_buffer == 0 {
        return Err(SettingsError::InvalidValue("broker.subscriberBuffer must be positive".into()));
    }
    if settings.server.identity_header.trim().is_empty() {
        return Err(SettingsError::InvalidValue("server.identityHeader is empty".into()));
    }
    Ok(())
}

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
