//! Unified configuration for a biblink run.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (biblink.toml)
//! ```toml
//! vocabulary = "tables/vocabulary.json"
//!
//! [queue]
//! workers = 6
//! capacity = 256
//!
//! [cache]
//! path = "/var/lib/biblink/lookup-cache"
//! ttl_days = 30
//!
//! [knowledge_base]
//! snapshot = "kb.json"
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a reconciliation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BiblinkConfig {
    /// Write queue sizing
    pub queue: QueueConfig,
    /// Citation lookup fallback
    pub lookup: LookupConfig,
    /// Extraction cache
    pub cache: CacheConfig,
    /// Knowledge base endpoints
    pub knowledge_base: KnowledgeBaseConfig,
    /// Reconciliation concurrency
    pub reconcile: ReconcileConfig,
    /// Provenance and creation defaults
    pub provenance: ProvenanceConfig,
    /// Optional JSON file overlaying the built-in vocabulary tables
    pub vocabulary: Option<PathBuf>,
}

impl BiblinkConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(BiblinkConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with BIBLINK_ prefix
        figment = figment.merge(Env::prefixed("BIBLINK_").split("__"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: BiblinkConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.workers == 0 {
            return Err(ConfigError::new("queue.workers must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::new("queue.capacity must be at least 1"));
        }
        if self.lookup.max_concurrent == 0 {
            return Err(ConfigError::new("lookup.max_concurrent must be at least 1"));
        }
        if self.reconcile.concurrency == 0 {
            return Err(ConfigError::new("reconcile.concurrency must be at least 1"));
        }
        if self.cache.ttl_days <= 0 {
            return Err(ConfigError::new("cache.ttl_days must be positive"));
        }
        Ok(())
    }
}

/// Write queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of write workers
    pub workers: usize,
    /// Bounded queue capacity
    pub capacity: usize,
    /// Per-task write timeout in seconds
    pub write_timeout_secs: u64,
}

impl QueueConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WRITE_WORKERS,
            capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
        }
    }
}

/// Citation lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Endpoint the encoded link is appended to
    pub endpoint: String,
    /// Per-lookup timeout in seconds
    pub timeout_secs: u64,
    /// Maximum concurrent lookups
    pub max_concurrent: usize,
    /// Minimum spacing between lookups in milliseconds
    pub min_interval_ms: u64,
    /// User agent for outgoing requests
    pub user_agent: String,
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LOOKUP_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_LOOKUP_TIMEOUT_SECS,
            max_concurrent: DEFAULT_LOOKUP_CONCURRENCY,
            min_interval_ms: DEFAULT_LOOKUP_MIN_INTERVAL_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Extraction cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// RocksDB directory; in-memory cache when unset
    pub path: Option<PathBuf>,
    /// Expiry of cached results in days
    pub ttl_days: i64,
    /// In-memory capacity
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_days: DEFAULT_CACHE_TTL_DAYS,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Knowledge base configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    pub sparql_endpoint: String,
    pub api_endpoint: String,
    pub entity_prefix: String,
    /// JSON snapshot for offline runs; read and written back when set
    pub snapshot: Option<PathBuf>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            sparql_endpoint: DEFAULT_SPARQL_ENDPOINT.to_string(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            entity_prefix: DEFAULT_ENTITY_PREFIX.to_string(),
            snapshot: None,
        }
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Records reconciled concurrently
    pub concurrency: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_RECONCILE_CONCURRENCY,
        }
    }
}

/// Provenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    /// Item cited as "stated in"
    pub source_item: String,
    /// Sponsor item for created entities (none to disable)
    pub sponsor: Option<String>,
    /// Language tag of title statements
    pub title_language: String,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            source_item: DEFAULT_SOURCE_ITEM.to_string(),
            sponsor: Some(DEFAULT_SPONSOR_ITEM.to_string()),
            title_language: DEFAULT_TITLE_LANGUAGE.to_string(),
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBaseOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BiblinkConfig::default();
        assert_eq!(config.queue.workers, DEFAULT_WRITE_WORKERS);
        assert_eq!(config.cache.ttl_days, 30);
        assert!(config.cache.path.is_none());
        assert_eq!(config.provenance.source_item, DEFAULT_SOURCE_ITEM);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ConfigOverrides {
            queue: Some(QueueOverrides { workers: Some(2) }),
            knowledge_base: Some(KnowledgeBaseOverrides {
                snapshot: Some(PathBuf::from("kb.json")),
            }),
            ..ConfigOverrides::default()
        };
        let config = BiblinkConfig::load(None, overrides).unwrap();
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.knowledge_base.snapshot, Some(PathBuf::from("kb.json")));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let overrides = ConfigOverrides {
            queue: Some(QueueOverrides { workers: Some(0) }),
            ..ConfigOverrides::default()
        };
        let err = BiblinkConfig::load(None, overrides).unwrap_err();
        assert!(err.to_string().contains("queue.workers"));
    }
}
