//! `pledge.toml` configuration
//!
//! Every field has a default so a partial file (or no file) is valid.

use crate::error::{EngineError, EngineResult};
use crate::parser::ledger::{NoWinnerPolicy, RemainderPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PledgeConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Upper bound on a single ledger-store call made by a request
    pub store_timeout_ms: u64,
    /// 0 disables the background sweeper
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            store_timeout_ms: 5_000,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Platform cut in basis points (1000 = 10%)
    pub platform_fee_bps: u32,
    pub winning_threshold: f64,
    /// Alternative winning path: members with at least this many meeting
    /// hours also win, regardless of progress
    pub minimum_meeting_hours: Option<f64>,
    pub hours_weight: f64,
    pub time_weight: f64,
    pub no_winner_policy: NoWinnerPolicy,
    pub remainder_policy: RemainderPolicy,
    pub max_cas_retries: u32,
    pub rescore_before_distribution: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: 1_000,
            winning_threshold: 100.0,
            minimum_meeting_hours: None,
            hours_weight: 0.7,
            time_weight: 0.3,
            no_winner_policy: NoWinnerPolicy::RefundMembers,
            remainder_policy: RemainderPolicy::Platform,
            max_cas_retries: 5,
            rescore_before_distribution: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.platform_fee_bps > 10_000 {
            return Err(EngineError::validation("platform_fee_bps must be <= 10000"));
        }
        if !(0.0..=100.0).contains(&self.winning_threshold) {
            return Err(EngineError::validation("winning_threshold must be within 0..=100"));
        }
        if self.hours_weight < 0.0 || self.time_weight < 0.0 {
            return Err(EngineError::validation("progress weights must be non-negative"));
        }
        if ((self.hours_weight + self.time_weight) - 1.0).abs() > 1e-9 {
            return Err(EngineError::validation("hours_weight + time_weight must equal 1"));
        }
        if self.max_cas_retries == 0 {
            return Err(EngineError::validation("max_cas_retries must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// EnvFilter directive, overrides `level` when set
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            filter: None,
        }
    }
}

impl PledgeConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        let config: PledgeConfig = toml::from_str(raw)
            .map_err(|e| EngineError::validation(format!("invalid config: {}", e)))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Missing file means defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::validation(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}
