//! Throttling of failed pairing claims.
//!
//! A claimer device that submits too many wrong codes inside the window is
//! blocked with exponential backoff. Failed attempts never touch the session
//! itself, so a legitimate claim still succeeds once the block lifts.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::{CoreError, InputError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
}

impl From<RateLimitError> for CoreError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::RateLimited { retry_after_secs } => {
                CoreError::Input(InputError::RateLimited { retry_after_secs })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Failed claims allowed per window per claimer device.
    pub failed_claims_per_window: u32,
    pub window_secs: i64,
    /// Base backoff, doubled on every further violation.
    pub base_backoff_secs: i64,
    pub max_backoff_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            failed_claims_per_window: 5,
            window_secs: 60,
            base_backoff_secs: 30,
            max_backoff_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SourceTracker {
    failures: Vec<DateTime<Utc>>,
    violations: u32,
    backoff_until: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    trackers: RwLock<HashMap<String, SourceTracker>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            trackers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn backoff_for(&self, violations: u32) -> Duration {
        let exp = violations.saturating_sub(1).min(16);
        let secs = self
            .config
            .base_backoff_secs
            .saturating_mul(1i64 << exp)
            .min(self.config.max_backoff_secs);
        Duration::seconds(secs)
    }

    /// Whether `source` may attempt a claim at `now`.
    pub async fn check(&self, source: &str, now: DateTime<Utc>) -> Result<(), RateLimitError> {
        let mut trackers = self.trackers.write().await;
        let Some(tracker) = trackers.get_mut(source) else {
            return Ok(());
        };

        if let Some(until) = tracker.backoff_until {
            if now < until {
                let retry_after_secs = (until - now).num_seconds().max(1) as u64;
                warn!(source = %source, retry_after_secs, "claim blocked during backoff period");
                return Err(RateLimitError::RateLimited { retry_after_secs });
            }
            tracker.backoff_until = None;
        }

        let window_start = now - Duration::seconds(self.config.window_secs);
        tracker.failures.retain(|&t| t > window_start);

        if tracker.failures.len() >= self.config.failed_claims_per_window as usize {
            tracker.violations += 1;
            let backoff = self.backoff_for(tracker.violations);
            tracker.backoff_until = Some(now + backoff);
            tracker.failures.clear();
            warn!(
                source = %source,
                violations = tracker.violations,
                backoff_secs = backoff.num_seconds(),
                "failed claim limit exceeded"
            );
            return Err(RateLimitError::RateLimited {
                retry_after_secs: backoff.num_seconds().max(1) as u64,
            });
        }

        Ok(())
    }

    pub async fn record_failure(&self, source: &str, now: DateTime<Utc>) {
        let mut trackers = self.trackers.write().await;
        let tracker = trackers.entry(source.to_string()).or_default();
        tracker.failures.push(now);
        warn!(source = %source, failures = tracker.failures.len(), "failed pairing claim");
    }

    /// A successful claim clears the source's history.
    pub async fn record_success(&self, source: &str) {
        self.trackers.write().await.remove(source);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
