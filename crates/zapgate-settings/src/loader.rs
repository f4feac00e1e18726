//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{zapgate_dir, Settings};

/// `~/.zapgate/settings.json`
pub fn settings_path() -> PathBuf {
    zapgate_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

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
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ZAPGATE_*` overrides. Values that fail to parse are ignored
/// with a warning.
fn apply_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader(env);

    if let Some(v) = env.string("ZAPGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("ZAPGATE_PORT", |s| parse_range::<u16>(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("ZAPGATE_DB_PATH") {
        settings.database.path = PathBuf::from(v);
    }
    if let Some(v) = env.string("ZAPGATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("ZAPGATE_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
    if let Some(v) = env.parsed("ZAPGATE_WEBHOOK_TIMEOUT_MS", |s| {
        parse_range::<u64>(s, 100, 300_000)
    }) {
        settings.webhook.timeout_ms = v;
    }
    if let Some(v) = env.parsed("ZAPGATE_WEBHOOK_MAX_ATTEMPTS", |s| parse_range::<u32>(s, 1, 20)) {
        settings.webhook.max_attempts = v;
    }
    if let Some(v) = env.parsed("ZAPGATE_AUTO_PAIR_SECS", |s| parse_range::<u64>(s, 0, 3600)) {
        settings.simulator.auto_pair_secs = v;
    }
}

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.string(key)?;
        let value = parse(&raw);
        if value.is_none() {
            tracing::warn!(key, value = %raw, "invalid env var, ignoring");
        }
        value
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
