//! Client configuration.
//!
//! Loaded from TOML or `KEYLINK_*` environment variables. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ```toml
//! relay_url = "https://relay.example.com"
//! poll_interval_ms = 1000
//! retry_base_ms = 500
//! retry_max_ms = 10000
//! claim_attempts = 3
//! request_timeout_secs = 10
//! log_level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid environment variable {name}: {value}")]
    EnvError { name: String, value: String },

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay base URL. `None` means an in-process relay.
    pub relay_url: Option<String>,
    pub poll_interval_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Attempts for a claim that fails in transport.
    pub claim_attempts: u32,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            poll_interval_ms: 1000,
            retry_base_ms: 500,
            retry_max_ms: 10_000,
            claim_attempts: 3,
            request_timeout_secs: 10,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *target = value.parse().map_err(|_| ConfigError::EnvError {
            name: name.to_string(),
            value,
        })?;
    }
    Ok(())
}

impl ClientConfig {
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `KEYLINK_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("KEYLINK_RELAY_URL") {
            config.relay_url = Some(url);
        }
        env_parse("KEYLINK_POLL_INTERVAL_MS", &mut config.poll_interval_ms)?;
        env_parse("KEYLINK_RETRY_BASE_MS", &mut config.retry_base_ms)?;
        env_parse("KEYLINK_RETRY_MAX_MS", &mut config.retry_max_ms)?;
        env_parse("KEYLINK_CLAIM_ATTEMPTS", &mut config.claim_attempts)?;
        env_parse("KEYLINK_REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        if let Ok(level) = std::env::var("KEYLINK_LOG_LEVEL") {
            config.log_level = level;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be > 0".into(),
            ));
        }
        if self.retry_base_ms == 0 || self.retry_max_ms < self.retry_base_ms {
            return Err(ConfigError::ValidationError(
                "retry_base_ms must be > 0 and <= retry_max_ms".into(),
            ));
        }
        if self.claim_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "claim_attempts must be >= 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }
        if let Some(url) = &self.relay_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "relay_url must be http(s): {url}"
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.retry_base_ms),
            max: Duration::from_millis(self.retry_max_ms),
            attempts: self.claim_attempts,
        }
    }
}

/// Exponential backoff for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Delay before retry number `failures` (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }
}
