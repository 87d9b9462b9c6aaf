//! Cache switch requests and entry migration.

use std::fmt;
use std::str::FromStr;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{Cache, CacheStrategy};
use crate::error::ConfigError;

/// What happens to existing entries when the cache strategy changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    /// Drop everything; the new cache starts empty.
    Invalidate,
    /// Copy live entries with their remaining TTL.
    Migrate,
}

impl fmt::Display for SwitchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalidate => "invalidate",
            Self::Migrate => "migrate",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SwitchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "invalidate" => Ok(Self::Invalidate),
            "migrate" => Ok(Self::Migrate),
            _ => Err(ConfigError::UnknownSwitchMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub strategy: CacheStrategy,
    pub mode: SwitchMode,
}

impl SwitchRequest {
    pub fn new(strategy: CacheStrategy, mode: SwitchMode) -> Self {
        Self { strategy, mode }
    }

    /// Parse user-supplied names, e.g. from an admin request body.
    pub fn parse(strategy: &str, mode: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            strategy: strategy.parse()?,
            mode: mode.parse()?,
        })
    }
}

/// Result of a completed switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchOutcome {
    pub success: bool,
    pub strategy: CacheStrategy,
    pub mode: SwitchMode,
    /// Entries copied; only present for [`SwitchMode::Migrate`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated: Option<usize>,
}

/// Copy every live entry of `from` into `to`, keeping its remaining TTL.
///
/// Entries are written concurrently. A failed write is logged and skipped.
/// Returns the number of entries written successfully.
pub(crate) async fn migrate_entries(from: &dyn Cache, to: &dyn Cache) -> usize {
    let entries = match from.get_all_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate cache entries, nothing migrated");
            return 0;
        }
    };
    let total = entries.len();

    let writes = entries.into_iter().map(|entry| async move {
        let ttl = entry.ttl();
        match to.set(&entry.key, entry.value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Failed to migrate cache entry");
                false
            }
        }
    });
    let migrated = join_all(writes).await.into_iter().filter(|ok| *ok).count();

    info!(migrated, total, "Migrated cache entries");
    migrated
}
