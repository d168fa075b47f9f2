//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwitchyardSettings::default()`]
//! 2. If `~/.switchyard/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SWITCHYARD_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogLevel, SwitchyardSettings};

/// Resolve the path to the settings file (`~/.switchyard/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchyard").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwitchyardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`SwitchyardSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchyardSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] with an injectable env lookup.
pub fn load_with_env(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SwitchyardSettings> {
    let defaults = serde_json::to_value(SwitchyardSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SwitchyardSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, lookup);
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

/// Apply `SWITCHYARD_*` overrides read through `lookup`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are logged
/// and ignored.
pub fn apply_env_overrides(
    settings: &mut SwitchyardSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SWITCHYARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("SWITCHYARD_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("SWITCHYARD_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.u64("SWITCHYARD_PING_PERIOD_MS", 100, 600_000) {
        settings.transport.ping_period_ms = v;
    }
    if let Some(v) = env.u64("SWITCHYARD_PONG_WAIT_MS", 100, 600_000) {
        settings.transport.pong_wait_ms = v;
    }
    if let Some(v) = env.u64("SWITCHYARD_WRITE_WAIT_MS", 10, 600_000) {
        settings.transport.write_wait_ms = v;
    }
    if let Some(v) = env.usize("SWITCHYARD_OUTBOUND_BUFFER", 1, 65_536) {
        settings.transport.outbound_buffer = v;
    }

    // ── Agent ───────────────────────────────────────────────────────
    if let Some(v) = env.u64("SWITCHYARD_COMMAND_TIMEOUT_MS", 10, 3_600_000) {
        settings.agent.command_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(raw) = env.string("SWITCHYARD_LOG_LEVEL") {
        match LogLevel::parse(&raw) {
            Some(level) => settings.logging.level = level,
            None => warn!(key = "SWITCHYARD_LOG_LEVEL", value = %raw, "invalid log level env var, ignoring"),
        }
    }
    if let Some(v) = env.bool("SWITCHYARD_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

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

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
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
}
