//! `ResultStore` trait: durable archive of completed job results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalysisResult;
use crate::error::StoreError;

/// A completed job's result as archived on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub job_id: String,
    pub article_id: String,
    pub title: String,
    pub attempts: u32,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Backend-agnostic durable store for job results.
///
/// Used as the fallback read path once a completed job has aged out of the
/// cache. Implementations must write atomically.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Archive the result of a completed job, replacing any previous one.
    async fn save_job_result(&self, result: &StoredResult) -> Result<(), StoreError>;

    /// Look up an archived result.
    async fn get_job_result(&self, job_id: &str) -> Result<Option<StoredResult>, StoreError>;
}
