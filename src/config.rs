// Configuration File Support
//
// TOML configuration for the shardline CLI and embedding applications.
// Files are loaded from the XDG config directory: ~/.config/shardline/config.toml
// and SHARDLINE_* environment variables override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::gateway::GatewayConfig;
use crate::rate_limit::RateLimitConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Route bucket container configuration
    pub rate_limit: RateLimitConfig,

    /// Identify admission configuration
    pub gateway: GatewayConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Register the Prometheus collectors and dump them on exit
    pub enabled: bool,
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_overrides(path.as_ref(), &|key| std::env::var(key).ok())
    }

    fn load_with_overrides<F>(path: &Path, lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/shardline/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "shardline", "shardline") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("shardline")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - SHARDLINE_LOG_LEVEL
    /// - SHARDLINE_LOG_FORMAT
    /// - SHARDLINE_RATELIMIT_CAPACITY
    /// - SHARDLINE_RATELIMIT_ATTEMPTS
    /// - SHARDLINE_RATELIMIT_RETRY_MS
    /// - SHARDLINE_IDENTIFY_CONCURRENCY
    /// - SHARDLINE_IDENTIFY_HOLD_SECS
    /// - SHARDLINE_METRICS_ENABLED
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(&|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("SHARDLINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SHARDLINE_LOG_FORMAT") {
            self.logging.format = format;
        }

        self.rate_limit = self.rate_limit.apply_overrides(lookup);

        if let Some(concurrency) = lookup("SHARDLINE_IDENTIFY_CONCURRENCY") {
            if let Ok(concurrency) = concurrency.parse::<usize>() {
                if concurrency > 0 {
                    self.gateway.max_concurrency = concurrency;
                }
            }
        }
        if let Some(hold) = lookup("SHARDLINE_IDENTIFY_HOLD_SECS") {
            if let Ok(hold) = hold.parse::<u64>() {
                if hold > 0 {
                    self.gateway.hold_timeout_secs = hold;
                }
            }
        }

        if let Some(enabled) = lookup("SHARDLINE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        self.rate_limit.validate()?;
        self.gateway.validate()?;

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
