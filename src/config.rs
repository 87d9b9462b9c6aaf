//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheStrategy;
use crate::error::ConfigError;

/// Cache subsystem configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Strategy used at startup.
    pub strategy: CacheStrategy,
    /// Directory for the durable file strategy.
    pub directory: PathBuf,
    /// How often the in-memory strategy sweeps expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::InMemory,
            directory: PathBuf::from("./data/cache"),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Job queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs processing at once.
    pub concurrency: usize,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Backoff for the first retry; doubles on each subsequent one.
    pub retry_base_delay: Duration,
    /// Re-check interval when the pending list is empty.
    pub idle_poll_interval: Duration,
    /// TTL of the `queued` placeholder and retry markers.
    pub queued_ttl: Duration,
    /// TTL of the `processing` marker.
    pub processing_ttl: Duration,
    /// TTL of `completed` and `failed` records.
    pub result_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            idle_poll_interval: Duration::from_millis(1000),
            queued_ttl: Duration::from_secs(3600), // 1 hour
            processing_ttl: Duration::from_secs(300), // 5 minutes
            result_ttl: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl QueueConfig {
    /// Backoff before retry number `attempts` (1-based): base × 2^(attempts-1).
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.retry_base_delay * 2u32.pow(exponent)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Offload analysis to the worker pool instead of running it in-process.
    pub enabled: bool,
    /// Number of execution units.
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_pool_size(),
        }
    }
}

/// Host CPU count, falling back to 1.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub pool: PoolConfig,
    /// Directory for archived job results (None disables the durable store).
    pub results_dir: Option<PathBuf>,
    /// HTTP listen port.
    pub http_port: u16,
    /// Upper bound on graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            pool: PoolConfig::default(),
            results_dir: Some(PathBuf::from("./data/results")),
            http_port: 3000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Build configuration from `PIPELINE_*` environment variables.
    ///
    /// Numeric values that fail to parse fall back to their defaults; an unknown
    /// cache strategy is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let strategy = match lookup("PIPELINE_CACHE_STRATEGY") {
            Some(raw) => raw.parse::<CacheStrategy>()?,
            None => defaults.cache.strategy,
        };

        let cache = CacheConfig {
            strategy,
            directory: lookup("PIPELINE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache.directory),
            sweep_interval: parsed("PIPELINE_CACHE_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache.sweep_interval),
        };

        let concurrency = parsed("PIPELINE_QUEUE_CONCURRENCY")
            .map(|n| n as usize)
            .unwrap_or(defaults.queue.concurrency);
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PIPELINE_QUEUE_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let queue = QueueConfig {
            concurrency,
            ..defaults.queue
        };

        let pool = PoolConfig {
            enabled: lookup("PIPELINE_USE_WORKER_POOL")
                .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.pool.enabled),
            size: parsed("PIPELINE_WORKER_POOL_SIZE")
                .map(|n| n as usize)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pool.size),
        };

        let results_dir = match lookup("PIPELINE_RESULTS_DIR") {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => defaults.results_dir,
        };

        Ok(Self {
            cache,
            queue,
            pool,
            results_dir,
            http_port: lookup("PIPELINE_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.http_port),
            shutdown_timeout: parsed("PIPELINE_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn retry_delays_double() {
        let config = QueueConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(500));
        assert_eq!(config.retry_delay(2), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn empty_env_gives_defaults() {
        let config = PipelineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.cache.strategy, CacheStrategy::InMemory);
        assert_eq!(config.queue.concurrency, 2);
        assert_eq!(config.http_port, 3000);
        assert!(config.results_dir.is_some());
    }

    #[test]
    fn env_overrides_apply() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("PIPELINE_CACHE_STRATEGY", "file"),
            ("PIPELINE_CACHE_DIR", "/tmp/cache"),
            ("PIPELINE_QUEUE_CONCURRENCY", "4"),
            ("PIPELINE_USE_WORKER_POOL", "false"),
            ("PIPELINE_WORKER_POOL_SIZE", "3"),
            ("PIPELINE_RESULTS_DIR", ""),
            ("PIPELINE_PORT", "8081"),
        ]))
        .unwrap();
        assert_eq!(config.cache.strategy, CacheStrategy::File);
        assert_eq!(config.cache.directory, PathBuf::from("/tmp/cache"));
        assert_eq!(config.queue.concurrency, 4);
        assert!(!config.pool.enabled);
        assert_eq!(config.pool.size, 3);
        assert!(config.results_dir.is_none());
        assert_eq!(config.http_port, 8081);
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config =
            PipelineConfig::from_lookup(lookup_from(&[("PIPELINE_PORT", "not-a-port")])).unwrap();
        assert_eq!(config.http_port, 3000);
    }

    #[test]
    fn unknown_strategy_is_error() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("PIPELINE_CACHE_STRATEGY", "redis")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCacheStrategy(s) if s == "redis"));
    }

    #[test]
    fn zero_concurrency_is_error() {
        let err =
            PipelineConfig::from_lookup(lookup_from(&[("PIPELINE_QUEUE_CONCURRENCY", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
