//! Article analysis jobs: the job model and the processing queue.

pub mod model;
pub mod queue;
mod timers;

pub use model::{Article, Job, JobRecord, JobStatus, status_key};
pub use queue::{AnalysisExecutor, JobQueue, QueueDeps, QueueStats, ShutdownReport};
