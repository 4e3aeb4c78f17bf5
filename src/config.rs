//! Service configuration.
//!
//! Loaded once at startup from `~/.beacon/config.json` (camelCase keys, every
//! field defaulted so a minimal config works). Validation failures are fatal:
//! the service refuses to start rather than running a degraded loop.

use std::fs;
use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal startup errors. The process exits instead of starting the loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// External structured-output generator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// Chat-completions style endpoint URL.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    /// Bearer token. Falls back to the BEACON_API_KEY environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

fn default_generator_timeout() -> u64 {
    120
}

/// Push delivery transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfig {
    /// HTTP endpoint the dispatcher POSTs notifications to.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
}

fn default_push_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Wheel tick interval for the scheduler loop.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Rolling window during which a repeat (kind, title) alert is suppressed.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_hours: i64,

    /// Sent alerts older than this are deleted by the cleanup task.
    #[serde(default = "default_retention")]
    pub retention_days: i64,

    /// How far ahead the upcoming-event scan looks.
    #[serde(default = "default_upcoming_window")]
    pub upcoming_window_minutes: i64,

    /// Slack applied when scanning for due alerts.
    #[serde(default = "default_due_window")]
    pub due_alert_window_minutes: i64,

    /// How far ahead the conflict scan pairs events.
    #[serde(default = "default_conflict_hours")]
    pub conflict_hours_ahead: i64,

    /// How far back the overdue scan looks.
    #[serde(default = "default_overdue_days")]
    pub overdue_days_back: i64,

    /// Grace after an event's effective end before it counts as overdue.
    #[serde(default = "default_overdue_grace")]
    pub overdue_grace_minutes: i64,

    /// Minimum period between activity-analysis runs.
    #[serde(default = "default_hourly_period")]
    pub analysis_period_minutes: i64,

    /// Minimum period between recommendation-generation runs. The timer only
    /// advances on success, so a failed batch retries promptly.
    #[serde(default = "default_hourly_period")]
    pub recommendation_period_minutes: i64,

    /// Bounded number of recommendation candidates requested per batch.
    #[serde(default = "default_max_recommendations")]
    pub max_recommendations: usize,

    /// Daily digest gate: local hour and minute window.
    #[serde(default = "default_digest_hour")]
    pub digest_hour: u32,
    #[serde(default = "default_minute_window")]
    pub digest_minute_window: u32,

    /// Retention cleanup gate: local hour and minute window.
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u32,
    #[serde(default = "default_minute_window")]
    pub cleanup_minute_window: u32,

    /// IANA timezone for the daily gates. Defaults to UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Explicit database path override. Defaults to `~/.beacon/beacon.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub push: PushConfig,
}

fn default_tick_interval() -> u64 {
    60
}
fn default_dedup_window() -> i64 {
    24
}
fn default_retention() -> i64 {
    30
}
fn default_upcoming_window() -> i64 {
    60
}
fn default_due_window() -> i64 {
    5
}
fn default_conflict_hours() -> i64 {
    24
}
fn default_overdue_days() -> i64 {
    3
}
fn default_overdue_grace() -> i64 {
    60
}
fn default_hourly_period() -> i64 {
    60
}
fn default_max_recommendations() -> usize {
    4
}
fn default_digest_hour() -> u32 {
    8
}
fn default_cleanup_hour() -> u32 {
    3
}
fn default_minute_window() -> u32 {
    10
}
fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default config")
    }
}

impl Config {
    /// Canonical config file path: `~/.beacon/config.json`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(home.join(".beacon").join("config.json"))
    }

    /// Load and validate the configuration. A missing file yields defaults,
    /// which then fail validation on the required generator/push settings —
    /// the service does not run without its collaborators configured.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        let config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup validation: required endpoints present, timezone parseable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generator.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("generator.endpoint"));
        }
        if self.generator.model.trim().is_empty() {
            return Err(ConfigError::Missing("generator.model"));
        }
        if self.push.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("push.endpoint"));
        }
        self.tz()?;
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    /// Generator API key: config value, or the BEACON_API_KEY environment
    /// variable.
    pub fn generator_api_key(&self) -> Option<String> {
        self.generator
            .api_key
            .clone()
            .or_else(|| std::env::var("BEACON_API_KEY").ok())
    }
}
