//! Error types for the article analyzer.

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown cache strategy: {0} (expected inmemory or file)")]
    UnknownCacheStrategy(String),

    #[error("Unknown cache switch mode: {0} (expected invalidate or migrate)")]
    UnknownSwitchMode(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Cache strategy errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} failed after {attempts} attempts: {reason}")]
    Exhausted {
        id: String,
        attempts: u32,
        reason: String,
    },
}

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Worker {index} exited while running task")]
    WorkerExited { index: usize },

    #[error("Failed to dispatch task to worker {index}")]
    DispatchFailed { index: usize },

    #[error("Failed to spawn worker {index}: {reason}")]
    SpawnFailed { index: usize, reason: String },

    #[error("Analysis failed in worker: {0}")]
    Analysis(String),
}

/// Durable result store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Analyzer errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis failed: {0}")]
    Failed(String),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
