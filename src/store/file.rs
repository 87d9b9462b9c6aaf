//! File-backed result store: one JSON document per job.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::traits::{ResultStore, StoredResult};
use crate::cache::file::{encode_key, write_atomic};
use crate::error::StoreError;

/// Stores results under `directory` as `<encoded job id>.json`.
pub struct FileResultStore {
    directory: PathBuf,
}

impl FileResultStore {
    /// Open (creating if needed) a store rooted at `directory`.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    fn result_path(&self, job_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", encode_key(job_id)))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save_job_result(&self, result: &StoredResult) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(result)?;
        write_atomic(&self.result_path(&result.job_id), &bytes).await?;
        debug!(job_id = %result.job_id, "Archived job result");
        Ok(())
    }

    async fn get_job_result(&self, job_id: &str) -> Result<Option<StoredResult>, StoreError> {
        let bytes = match fs::read(self.result_path(job_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::analyzer::analyze_text;

    fn stored(job_id: &str) -> StoredResult {
        StoredResult {
            job_id: job_id.to_string(),
            article_id: "article-1".into(),
            title: "Title".into(),
            attempts: 0,
            result: analyze_text("hello hello world"),
            created_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::open(dir.path()).await.unwrap();
        let result = stored("job/1");
        store.save_job_result(&result).await.unwrap();

        let loaded = store.get_job_result("job/1").await.unwrap().unwrap();
        assert_eq!(loaded, result);
    }

    #[tokio::test]
    async fn missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::open(dir.path()).await.unwrap();
        assert!(store.get_job_result("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{").unwrap();
        assert!(store.get_job_result("bad").await.is_err());
    }

    #[tokio::test]
    async fn overwrite_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::open(dir.path()).await.unwrap();
        let mut result = stored("job-2");
        store.save_job_result(&result).await.unwrap();
        result.attempts = 2;
        store.save_job_result(&result).await.unwrap();
        assert_eq!(store.get_job_result("job-2").await.unwrap().unwrap().attempts, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
