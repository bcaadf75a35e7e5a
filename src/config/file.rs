// src/config/file.rs
// Fully-materialized configuration structure. Sourcing (files, env) belongs
// to the host application; `from_toml_str` is provided for hosts that hold
// config text.

use crate::error::{Result, TransHubError};
use serde::Deserialize;
use std::collections::HashMap;

/// Top-level config structure
#[derive(Debug, Clone, Deserialize)]
pub struct TransHubConfig {
    /// Path (or `:memory:`) of the SQLite database backing the store.
    #[serde(default = "TransHubConfig::default_database_url")]
    pub database_url: String,
    /// Engine activated on `Coordinator::initialize`.
    #[serde(default = "TransHubConfig::default_active_engine")]
    pub active_engine: String,
    /// Default source language; None means auto-detect.
    #[serde(default)]
    pub source_lang: Option<String>,
    /// Upper bound on rows claimed per batch.
    #[serde(default = "TransHubConfig::default_batch_size")]
    pub batch_size: usize,
    /// Default retention for `run_gc`, in whole days.
    #[serde(default = "TransHubConfig::default_gc_retention_days")]
    pub gc_retention_days: u32,
    /// TRANSLATING rows idle longer than this are considered abandoned and
    /// reverted to PENDING at the start of each processing run.
    #[serde(default = "TransHubConfig::default_stale_claim_after_secs")]
    pub stale_claim_after_secs: u64,
    /// Per-call timeout on engine batch requests.
    #[serde(default = "TransHubConfig::default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// Per-engine configuration, opaque to the core.
    #[serde(default)]
    pub engine_configs: HashMap<String, serde_json::Value>,
}

impl Default for TransHubConfig {
    fn default() -> Self {
        Self {
            database_url: Self::default_database_url(),
            active_engine: Self::default_active_engine(),
            source_lang: None,
            batch_size: Self::default_batch_size(),
            gc_retention_days: Self::default_gc_retention_days(),
            stale_claim_after_secs: Self::default_stale_claim_after_secs(),
            engine_timeout_secs: Self::default_engine_timeout_secs(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            rate_limiter: RateLimiterConfig::default(),
            engine_configs: HashMap::new(),
        }
    }
}

impl TransHubConfig {
    fn default_database_url() -> String {
        "trans-hub.db".to_string()
    }
    fn default_active_engine() -> String {
        "debug".to_string()
    }
    fn default_batch_size() -> usize {
        50
    }
    fn default_gc_retention_days() -> u32 {
        90
    }
    fn default_stale_claim_after_secs() -> u64 {
        600
    }
    fn default_engine_timeout_secs() -> u64 {
        30
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| TransHubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency before handing the config to a coordinator.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(TransHubError::Config("database_url must not be empty".into()));
        }
        if self.active_engine.is_empty() {
            return Err(TransHubError::Config("active_engine must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(TransHubError::Config("batch_size must be at least 1".into()));
        }
        self.cache.validate()?;
        self.retry.validate()?;
        self.rate_limiter.validate()?;
        Ok(())
    }

    /// Config blob for the named engine; missing entries mean "no config".
    pub fn engine_config(&self, name: &str) -> serde_json::Value {
        self.engine_configs
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Cache bounding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Entries expire `ttl_secs` after insertion (capacity still applies).
    Ttl,
    /// Least-recently-used eviction once `maxsize` is exceeded.
    Lru,
}

/// Cache configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_policy", rename = "type")]
    pub policy: CachePolicy,
    #[serde(default = "CacheConfig::default_maxsize")]
    pub maxsize: usize,
    #[serde(default = "CacheConfig::default_ttl_secs", rename = "ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: Self::default_policy(),
            maxsize: Self::default_maxsize(),
            ttl_secs: Self::default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    fn default_policy() -> CachePolicy {
        CachePolicy::Ttl
    }
    fn default_maxsize() -> usize {
        1000
    }
    fn default_ttl_secs() -> u64 {
        3600
    }

    fn validate(&self) -> Result<()> {
        if self.maxsize == 0 {
            return Err(TransHubError::Config("cache.maxsize must be at least 1".into()));
        }
        if self.policy == CachePolicy::Ttl && self.ttl_secs == 0 {
            return Err(TransHubError::Config(
                "cache.ttl must be positive for the ttl policy".into(),
            ));
        }
        Ok(())
    }
}

/// Retry policy section
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryPolicy::default_initial_backoff_secs", rename = "initial_backoff")]
    pub initial_backoff_secs: f64,
    #[serde(default = "RetryPolicy::default_max_backoff_secs", rename = "max_backoff")]
    pub max_backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_secs: Self::default_initial_backoff_secs(),
            max_backoff_secs: Self::default_max_backoff_secs(),
        }
    }
}

impl RetryPolicy {
    fn default_max_attempts() -> u32 {
        3
    }
    fn default_initial_backoff_secs() -> f64 {
        1.0
    }
    fn default_max_backoff_secs() -> f64 {
        30.0
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TransHubError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_backoff_secs < 0.0 || self.max_backoff_secs < 0.0 {
            return Err(TransHubError::Config("retry backoffs must be non-negative".into()));
        }
        Ok(())
    }

    /// Deterministic exponential backoff for a 1-based attempt index,
    /// capped at `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let secs = self.initial_backoff_secs * f64::from(1u32 << exp);
        std::time::Duration::from_secs_f64(secs.min(self.max_backoff_secs))
    }
}

/// Token-bucket parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "RateLimiterConfig::default_capacity")]
    pub capacity: f64,
    #[serde(default = "RateLimiterConfig::default_refill_rate")]
    pub refill_rate: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            refill_rate: Self::default_refill_rate(),
        }
    }
}

impl RateLimiterConfig {
    fn default_capacity() -> f64 {
        10.0
    }
    fn default_refill_rate() -> f64 {
        5.0
    }

    fn validate(&self) -> Result<()> {
        if self.capacity <= 0.0 || self.refill_rate <= 0.0 {
            return Err(TransHubError::Config(
                "rate_limiter.capacity and refill_rate must be positive".into(),
            ));
        }
        Ok(())
    }
}
