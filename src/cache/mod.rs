//! Key/value cache with per-entry TTL.
//!
//! Two strategies implement the same [`Cache`] trait:
//! - `memory`: a map swept periodically in the background
//! - `file`: one JSON file per key, written atomically
//!
//! [`CacheHandle`] holds the currently published strategy and lets the
//! pipeline swap it while other operations are in flight.

pub mod file;
pub mod handle;
pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{CacheError, ConfigError};

pub use file::FileCache;
pub use handle::CacheHandle;
pub use memory::MemoryCache;

/// Which cache implementation is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    InMemory,
    File,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InMemory => "inmemory",
            Self::File => "file",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CacheStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inmemory" | "in-memory" | "memory" => Ok(Self::InMemory),
            "file" => Ok(Self::File),
            _ => Err(ConfigError::UnknownCacheStrategy(s.to_string())),
        }
    }
}

/// A live entry with its remaining lifetime, as returned by
/// [`Cache::get_all_entries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Capability shared by every cache strategy.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Which strategy this is.
    fn strategy(&self) -> CacheStrategy;

    /// Store `value` under `key` until `ttl` elapses, replacing any existing entry.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration)
    -> Result<(), CacheError>;

    /// Fetch a live value. An expired entry is evicted when observed.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Every live entry with its remaining TTL at call time. Corrupted records
    /// are skipped.
    async fn get_all_entries(&self) -> Result<Vec<CacheEntry>, CacheError>;
}

/// Construct a fresh cache for `strategy`.
pub async fn build_cache(
    strategy: CacheStrategy,
    config: &CacheConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Cache>, CacheError> {
    let cache: Arc<dyn Cache> = match strategy {
        CacheStrategy::InMemory => MemoryCache::new(clock, config.sweep_interval),
        CacheStrategy::File => Arc::new(FileCache::open(&config.directory, clock).await?),
    };
    Ok(cache)
}

/// Absolute expiry for an entry written now.
pub(crate) fn expiry_from(now_ms: u64, ttl: Duration) -> u64 {
    now_ms.saturating_add(ttl.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("inmemory".parse::<CacheStrategy>().unwrap(), CacheStrategy::InMemory);
        assert_eq!("Memory".parse::<CacheStrategy>().unwrap(), CacheStrategy::InMemory);
        assert_eq!(" file ".parse::<CacheStrategy>().unwrap(), CacheStrategy::File);
        assert!("redis".parse::<CacheStrategy>().is_err());
    }

    #[test]
    fn strategy_display_round_trips() {
        for strategy in [CacheStrategy::InMemory, CacheStrategy::File] {
            assert_eq!(strategy.to_string().parse::<CacheStrategy>().unwrap(), strategy);
        }
    }

    #[tokio::test]
    async fn build_cache_picks_strategy() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = CacheConfig {
            directory: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());

        let memory = build_cache(CacheStrategy::InMemory, &config, clock.clone())
            .await
            .unwrap();
        assert_eq!(memory.strategy(), CacheStrategy::InMemory);

        let file = build_cache(CacheStrategy::File, &config, clock).await.unwrap();
        assert_eq!(file.strategy(), CacheStrategy::File);
    }
}
