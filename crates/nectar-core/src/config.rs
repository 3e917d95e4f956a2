//! Evaluator configuration.
//!
//! Values come from a [`SettingsSource`], the read-only view of whatever
//! key/value store the host application uses, or from a JSON file.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{DEFAULT_MAX_SIZE, ResultCache};
use crate::error::{Error, Result};
use crate::registry::RetryPolicy;

/// Setting names read by [`EvaluatorConfig::from_settings`].
pub mod keys {
    pub const CACHE_MAX_SIZE: &str = "cache.max_size";
    pub const CACHE_ENABLED: &str = "cache.enabled";
    pub const RETRY_MAX_ATTEMPTS: &str = "retry.max_attempts";
    pub const RETRY_WAIT_MS: &str = "retry.wait_ms";
    pub const RETRY_BACKOFF_MS: &str = "retry.backoff_ms";
    pub const RETRY_BACKOFF_AFTER: &str = "retry.backoff_after";
    pub const PARALLEL_WORKERS: &str = "parallel.workers";
}

/// Read-only access to named settings.
pub trait SettingsSource {
    fn get(&self, key: &str) -> Option<String>;
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Settings taken from environment variables.
///
/// `cache.max_size` is read from `NECTAR_CACHE_MAX_SIZE`.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    prefix: String,
}

impl EnvSettings {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.replace('.', "_")).to_uppercase()
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::new("NECTAR")
    }
}

impl SettingsSource for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key)).ok()
    }
}

/// Configuration for evaluators and the module registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Maximum number of cached results
    pub cache_max_size: usize,

    /// Whether new caches start enabled
    pub cache_enabled: bool,

    /// Retry budget for module path resolution
    pub retry: RetryPolicy,

    /// Worker sessions used by the parallel evaluator
    pub workers: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            cache_max_size: DEFAULT_MAX_SIZE,
            cache_enabled: true,
            retry: RetryPolicy::default(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

fn parse<T>(source: &impl SettingsSource, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| Error::InvalidConfig {
                key: key.to_string(),
                message: format!("{:?}: {}", raw, e),
            }),
    }
}

impl EvaluatorConfig {
    /// Defaults overridden by whatever `source` defines.
    pub fn from_settings(source: &impl SettingsSource) -> Result<Self> {
        let mut config = Self::default();

        if let Some(size) = parse(source, keys::CACHE_MAX_SIZE)? {
            config.cache_max_size = size;
        }
        if let Some(enabled) = parse(source, keys::CACHE_ENABLED)? {
            config.cache_enabled = enabled;
        }
        if let Some(attempts) = parse(source, keys::RETRY_MAX_ATTEMPTS)? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse(source, keys::RETRY_WAIT_MS)? {
            config.retry.wait = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(source, keys::RETRY_BACKOFF_MS)? {
            config.retry.backoff = Duration::from_millis(ms);
        }
        if let Some(after) = parse(source, keys::RETRY_BACKOFF_AFTER)? {
            config.retry.backoff_after = after;
        }
        if let Some(workers) = parse::<usize>(source, keys::PARALLEL_WORKERS)? {
            if workers == 0 {
                return Err(Error::InvalidConfig {
                    key: keys::PARALLEL_WORKERS.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.workers = workers;
        }

        Ok(config)
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_settings(&EnvSettings::default())
    }

    /// Read a JSON configuration file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::InvalidConfig {
            key: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn with_cache_max_size(mut self, max_size: usize) -> Self {
        self.cache_max_size = max_size;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// A cache configured from these settings.
    pub fn build_cache(&self) -> ResultCache {
        let cache = ResultCache::new(self.cache_max_size);
        if !self.cache_enabled {
            cache.disable();
        }
        cache
    }
}
