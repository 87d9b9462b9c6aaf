//! Job types and the per-job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzer::AnalysisResult;

/// The payload a job analyzes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

impl Article {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue, either fresh or awaiting a retry.
    Queued,
    /// An attempt is running.
    Processing,
    /// Analysis finished and the result was stored.
    Completed,
    /// Retries exhausted.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                // Retriable failure
                | (Processing, Queued)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub article: Article,
    pub status: JobStatus,
    /// Processing attempts that have failed so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with a generated id.
    pub fn new(article: Article) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), article)
    }

    /// Create a job with a caller-supplied id.
    pub fn with_id(job_id: impl Into<String>, article: Article) -> Self {
        Self {
            job_id: job_id.into(),
            article,
            status: JobStatus::Queued,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// Move to `target`. Invalid transitions are a programming error.
    pub fn transition_to(&mut self, target: JobStatus) {
        debug_assert!(
            self.status.can_transition_to(target),
            "invalid job transition {} -> {}",
            self.status,
            target
        );
        self.status = target;
    }

    /// Cache key for this job's status record.
    pub fn status_key(&self) -> String {
        status_key(&self.job_id)
    }
}

/// Cache key holding the status record of `job_id`.
pub fn status_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

/// What the cache holds for a job: the latest status plus result or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub article_id: String,
    pub title: String,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Snapshot of `job` in its current status.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            article_id: job.article.id.clone(),
            title: job.article.title.clone(),
            status: job.status,
            attempts: job.attempts,
            result: None,
            error: None,
            created_at: job.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn with_result(mut self, result: AnalysisResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
