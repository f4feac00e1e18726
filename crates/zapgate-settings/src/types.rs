use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub webhook: WebhookSettings,
    pub logging: LoggingSettings,
    pub simulator: SimulatorSettings,
}

impl Settings {
    /// Reject combinations that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let w = &self.webhook;
        if w.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "webhook.max_attempts must be >= 1".into(),
            ));
        }
        if w.initial_backoff_ms > w.max_backoff_ms {
            return Err(SettingsError::InvalidValue(format!(
                "webhook.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                w.initial_backoff_ms, w.max_backoff_ms
            )));
        }
        if !(1.0..=10.0).contains(&w.backoff_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "webhook.backoff_factor out of range: {}",
                w.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&w.jitter) {
            return Err(SettingsError::InvalidValue(format!(
                "webhook.jitter out of range: {}",
                w.jitter
            )));
        }
        Ok(())
    }
}

/// HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: zapgate_dir().join("zapgate.db"),
        }
    }
}

/// Outbound delivery and retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: f64,
    /// Fraction of the delay applied as random jitter (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). RUST_LOG still wins.
    pub level: String,
    pub json: bool,
    /// Persist WARN+ records to `db_path`.
    pub persist_warnings: bool,
    pub db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            persist_warnings: true,
            db_path: zapgate_dir().join("logs.db"),
        }
    }
}

/// Simulated protocol backend used in development mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Seconds between the first QR code and a simulated successful scan.
    /// Zero disables auto-pairing.
    pub auto_pair_secs: u64,
    /// Seconds before a displayed QR code times out and is replaced.
    pub qr_refresh_secs: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            auto_pair_secs: 20,
            qr_refresh_secs: 60,
        }
    }
}

/// `~/.zapgate`
pub fn zapgate_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".zapgate")
}
