use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "run-sheet-sync.json";
const CONFIG_SCHEMA: u64 = 1;
const CLIENT_ID_ENV: &str = "WHOOP_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "WHOOP_CLIENT_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApiGeneration {
    /// Legacy endpoint: plain date bounds, one unpaginated response.
    V1,
    /// Current endpoint: instant bounds, `nextToken` pagination.
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 16_000,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub schema: u64,
    pub timezone: String,
    pub worksheet: String,
    pub api_generation: ApiGeneration,
    pub running_sport_ids: Vec<i64>,
    pub http_timeout_seconds: u64,
    pub page_limit: u32,
    pub max_pages: u32,
    pub retry: RetrySettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            schema: CONFIG_SCHEMA,
            timezone: "UTC".to_string(),
            worksheet: "Running".to_string(),
            api_generation: ApiGeneration::V2,
            running_sport_ids: vec![0],
            http_timeout_seconds: 30,
            page_limit: 25,
            max_pages: 100,
            retry: RetrySettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("unknown timezone '{}': {error}", self.timezone))
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    fn validate(&self) -> Result<(), InfraError> {
        self.time_zone()?;
        if self.worksheet.trim().is_empty() {
            return Err(InfraError::InvalidConfig("worksheet must not be empty".to_string()));
        }
        if self.running_sport_ids.is_empty() {
            return Err(InfraError::InvalidConfig(
                "runningSportIds must contain at least one sport id".to_string(),
            ));
        }
        if self.max_pages == 0 || self.page_limit == 0 {
            return Err(InfraError::InvalidConfig(
                "maxPages and pageLimit must be greater than zero".to_string(),
            ));
        }
        if self.http_timeout_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "httpTimeoutSeconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads the settings file if it exists; a missing file means defaults.
pub fn load_settings(path: &Path) -> Result<SyncSettings, InfraError> {
    if !path.exists() {
        return Ok(SyncSettings::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != CONFIG_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let settings: SyncSettings = serde_json::from_value(parsed)?;
    settings.validate()?;
    Ok(settings)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoopAppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl WhoopAppCredentials {
    pub fn from_env() -> Result<Self, InfraError> {
        Ok(Self {
            client_id: read_env(CLIENT_ID_ENV)?,
            client_secret: read_env(CLIENT_SECRET_ENV)?,
        })
    }
}

fn read_env(name: &str) -> Result<String, InfraError> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InfraError::InvalidConfig(format!("{name} must be set (environment or .env)")))
}
