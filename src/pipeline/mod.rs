//! Analysis pipeline: job intake, status lookup, and cache switching.
//!
//! The pipeline owns every long-lived piece and wires them together:
//!
//! ```text
//! submit ──▶ cache (queued) ──▶ JobQueue ──▶ executor (in-process | WorkerPool)
//!                                   │
//!                                   ├──▶ cache (processing / completed / failed)
//!                                   └──▶ ResultStore (completed results)
//! ```
//!
//! A cache switch builds the new strategy, publishes it through the
//! [`CacheHandle`], and replaces the queue. The old queue hands its pending
//! jobs to the new one.

pub mod switch;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::analyzer::{Analyzer, TextAnalyzer};
use crate::cache::{Cache, CacheHandle, CacheStrategy, build_cache};
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::error::{CacheError, Result};
use crate::jobs::{
    AnalysisExecutor, Article, Job, JobQueue, JobRecord, JobStatus, QueueDeps, QueueStats,
    ShutdownReport, status_key,
};
use crate::metrics::{MetricsSnapshot, QueueMetrics};
use crate::store::{FileResultStore, ResultStore};
use crate::worker::{PoolStats, WorkerPool};

pub use switch::{SwitchMode, SwitchOutcome, SwitchRequest};

/// Pluggable collaborators. [`Pipeline::new`] fills these from config.
pub struct PipelineDeps {
    pub clock: Arc<dyn Clock>,
    pub analyzer: Arc<dyn Analyzer>,
    pub store: Option<Arc<dyn ResultStore>>,
}

pub struct Pipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    cache: Arc<CacheHandle>,
    queue: ArcSwap<JobQueue>,
    pool: Option<Arc<WorkerPool>>,
    metrics: Arc<QueueMetrics>,
    store: Option<Arc<dyn ResultStore>>,
    /// Serializes cache switches.
    switching: Mutex<()>,
}

impl Pipeline {
    /// Build a pipeline with the system clock, the text analyzer and, if a
    /// results directory is configured, a file result store.
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        let store: Option<Arc<dyn ResultStore>> = match &config.results_dir {
            Some(dir) => Some(Arc::new(FileResultStore::open(dir).await?)),
            None => None,
        };
        let deps = PipelineDeps {
            clock: Arc::new(SystemClock),
            analyzer: Arc::new(TextAnalyzer),
            store,
        };
        Self::with_deps(config, deps).await
    }

    pub async fn with_deps(config: PipelineConfig, deps: PipelineDeps) -> Result<Self> {
        let initial = build_cache(config.cache.strategy, &config.cache, Arc::clone(&deps.clock)).await?;
        let cache = Arc::new(CacheHandle::new(initial));

        let pool = config
            .pool
            .enabled
            .then(|| Arc::new(WorkerPool::new(Arc::clone(&deps.analyzer), config.pool.size)));
        let executor = match &pool {
            Some(pool) => AnalysisExecutor::Pool(Arc::clone(pool)),
            None => AnalysisExecutor::InProcess(deps.analyzer),
        };
        let metrics = Arc::new(QueueMetrics::new());

        let queue = JobQueue::new(
            config.queue.clone(),
            QueueDeps {
                cache: Arc::clone(&cache),
                executor,
                metrics: Arc::clone(&metrics),
                store: deps.store.clone(),
            },
        );

        Ok(Self {
            config,
            clock: deps.clock,
            cache,
            queue: ArcSwap::new(queue),
            pool,
            metrics,
            store: deps.store,
            switching: Mutex::new(()),
        })
    }

    /// Start the worker pool (if enabled) and the queue.
    pub fn start(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            pool.start()?;
        }
        self.queue.load().start();
        info!(
            cache = %self.cache.strategy(),
            pool = self.pool.is_some(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Submit an article under a generated job id.
    pub async fn submit(&self, article: Article) -> Result<Job> {
        self.submit_job(Job::new(article)).await
    }

    /// Record the `queued` placeholder and enqueue `job`. If the placeholder
    /// cannot be written the job is not enqueued.
    pub async fn submit_job(&self, job: Job) -> Result<Job> {
        self.cache
            .current()
            .set(
                &job.status_key(),
                JobRecord::from_job(&job).to_value(),
                self.config.queue.queued_ttl,
            )
            .await?;
        self.queue.load().enqueue(job.clone());
        Ok(job)
    }

    /// Latest known record for `job_id`. Falls back to the result store when
    /// the cache no longer holds the job.
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        if let Some(value) = self.cache.current().get(&status_key(job_id)).await? {
            let record = serde_json::from_value(value).map_err(CacheError::from)?;
            return Ok(Some(record));
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };
        Ok(store.get_job_result(job_id).await?.map(|stored| JobRecord {
            job_id: stored.job_id,
            article_id: stored.article_id,
            title: stored.title,
            status: JobStatus::Completed,
            attempts: stored.attempts,
            result: Some(stored.result),
            error: None,
            created_at: stored.created_at,
            updated_at: stored.completed_at,
        }))
    }

    /// Replace the active cache with a fresh `request.strategy` cache and
    /// rebuild the queue against it. Switches never overlap.
    pub async fn switch_cache(&self, request: SwitchRequest) -> Result<SwitchOutcome> {
        let _switching = self.switching.lock().await;
        let old = self.cache.current();
        info!(
            from = %old.strategy(),
            to = %request.strategy,
            mode = %request.mode,
            "Switching cache"
        );

        let migrated = match request.mode {
            SwitchMode::Invalidate => {
                clear_quietly(old.as_ref()).await;
                let fresh = self.build(request.strategy).await?;
                // A file cache reopens whatever is already on disk.
                clear_quietly(fresh.as_ref()).await;
                self.cache.publish(fresh);
                None
            }
            SwitchMode::Migrate => {
                let fresh = self.build(request.strategy).await?;
                let migrated = if old.strategy() == CacheStrategy::File
                    && request.strategy == CacheStrategy::File
                {
                    // Same directory: every live entry is already in place.
                    live_entry_count(fresh.as_ref()).await
                } else {
                    // Leftovers from an earlier file period must not resurface.
                    clear_quietly(fresh.as_ref()).await;
                    switch::migrate_entries(old.as_ref(), fresh.as_ref()).await
                };
                self.cache.publish(fresh);
                Some(migrated)
            }
        };

        self.rebuild_queue();
        Ok(SwitchOutcome {
            success: true,
            strategy: request.strategy,
            mode: request.mode,
            migrated,
        })
    }

    /// Drain the queue for up to `timeout`, then stop it and the worker pool.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let report = self.queue.load_full().shutdown(timeout).await;
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
        info!(drained = report.drained, "Pipeline shut down");
        report
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(|pool| pool.get_stats())
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.load().stats()
    }

    pub fn cache_strategy(&self) -> CacheStrategy {
        self.cache.strategy()
    }

    /// The cache currently in use.
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.cache.current()
    }

    async fn build(&self, strategy: CacheStrategy) -> Result<Arc<dyn Cache>> {
        Ok(build_cache(strategy, &self.config.cache, Arc::clone(&self.clock)).await?)
    }

    /// Swap in a replacement queue. It shares the old queue's active and
    /// retry accounting, so shutdown still waits for work started before.
    fn rebuild_queue(&self) {
        let next = self.queue.load().replacement();
        let previous = self.queue.swap(Arc::clone(&next));
        let was_running = previous.is_running();
        previous.retire_into(&next);
        if was_running {
            next.start();
        }
    }
}

async fn live_entry_count(cache: &dyn Cache) -> usize {
    match cache.get_all_entries().await {
        Ok(entries) => entries.len(),
        Err(e) => {
            warn!(strategy = %cache.strategy(), error = %e, "Failed to enumerate cache entries");
            0
        }
    }
}

async fn clear_quietly(cache: &dyn Cache) {
    if let Err(e) = cache.clear().await {
        warn!(strategy = %cache.strategy(), error = %e, "Failed to clear cache");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::analyzer::AnalysisResult;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, PoolConfig};
    use crate::error::AnalysisError;

    struct Harness {
        pipeline: Pipeline,
        clock: Arc<ManualClock>,
        _dirs: TempDir,
    }

    async fn harness(with_store: bool) -> Harness {
        harness_with(Arc::new(TextAnalyzer), with_store).await
    }

    async fn harness_with(analyzer: Arc<dyn Analyzer>, with_store: bool) -> Harness {
        let dirs = TempDir::new().unwrap();
        let config = PipelineConfig {
            cache: CacheConfig {
                strategy: CacheStrategy::InMemory,
                directory: dirs.path().join("cache"),
                sweep_interval: Duration::ZERO,
            },
            pool: PoolConfig {
                enabled: false,
                size: 1,
            },
            ..PipelineConfig::default()
        };
        let store: Option<Arc<dyn ResultStore>> = if with_store {
            Some(Arc::new(
                FileResultStore::open(dirs.path().join("results")).await.unwrap(),
            ))
        } else {
            None
        };
        let clock = Arc::new(ManualClock::default());
        let deps = PipelineDeps {
            clock: clock.clone(),
            analyzer,
            store,
        };
        let pipeline = Pipeline::with_deps(config, deps).await.unwrap();
        pipeline.start().unwrap();
        Harness {
            pipeline,
            clock,
            _dirs: dirs,
        }
    }

    async fn wait_for_processed(pipeline: &Pipeline, count: u64) {
        for _ in 0..500 {
            if pipeline.metrics().processed >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not complete");
    }

    fn article(content: &str) -> Article {
        Article::new("article-1", "A title", content)
    }

    #[tokio::test]
    async fn submitted_job_completes() {
        let h = harness(false).await;
        let job = h.pipeline.submit(article("test test test word word other")).await.unwrap();
        wait_for_processed(&h.pipeline, 1).await;

        let record = h.pipeline.job_status(&job.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result.unwrap().word_count, 6);
        h.pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let h = harness(true).await;
        assert!(h.pipeline.job_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_existing_keys() {
        let h = harness(false).await;
        h.pipeline
            .cache()
            .set("k", json!("v"), Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = h
            .pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Invalidate))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.migrated, None);
        assert_eq!(h.pipeline.cache_strategy(), CacheStrategy::File);
        assert_eq!(h.pipeline.cache().get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn migrate_keeps_keys_with_remaining_ttl() {
        let h = harness(false).await;
        h.pipeline
            .cache()
            .set("k", json!({"n": 1}), Duration::from_millis(5000))
            .await
            .unwrap();
        h.clock.advance(Duration::from_millis(2000));

        let outcome = h
            .pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Migrate))
            .await
            .unwrap();
        assert_eq!(outcome.migrated, Some(1));

        let cache = h.pipeline.cache();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"n": 1})));
        let entries = cache.get_all_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ttl_ms > 0);
        assert!(entries[0].ttl_ms <= 3000);
    }

    #[tokio::test]
    async fn jobs_keep_running_after_switch() {
        let h = harness(false).await;
        h.pipeline.submit(article("first")).await.unwrap();
        wait_for_processed(&h.pipeline, 1).await;

        h.pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Invalidate))
            .await
            .unwrap();
        assert!(h.pipeline.queue_stats().running);

        let job = h.pipeline.submit(article("second")).await.unwrap();
        wait_for_processed(&h.pipeline, 2).await;
        let record = h.pipeline.job_status(&job.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn completed_result_survives_cache_invalidation() {
        let h = harness(true).await;
        let job = h.pipeline.submit(article("kept in the store")).await.unwrap();
        wait_for_processed(&h.pipeline, 1).await;

        h.pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::InMemory, SwitchMode::Invalidate))
            .await
            .unwrap();

        let record = h.pipeline.job_status(&job.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result.unwrap().word_count, 4);
    }

    struct AlwaysFails;

    impl Analyzer for AlwaysFails {
        fn analyze(&self, _content: &str) -> std::result::Result<AnalysisResult, AnalysisError> {
            Err(AnalysisError::Failed("always".into()))
        }
    }

    #[tokio::test]
    async fn shutdown_after_switch_waits_for_earlier_retry() {
        let h = harness_with(Arc::new(AlwaysFails), false).await;
        h.pipeline.submit(article("doomed")).await.unwrap();
        for _ in 0..500 {
            if h.pipeline.metrics().retried == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.pipeline.metrics().retried, 1);

        h.pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::InMemory, SwitchMode::Invalidate))
            .await
            .unwrap();
        assert_eq!(h.pipeline.queue_stats().pending_retries, 1);

        let timeout = Duration::from_millis(200);
        let started = std::time::Instant::now();
        let report = h.pipeline.shutdown(timeout).await;
        assert!(!report.drained);
        assert_eq!(report.pending_retries, 1);
        assert!(started.elapsed() >= timeout);
    }

    #[tokio::test]
    async fn migrate_into_file_does_not_resurrect_stale_entries() {
        let h = harness(false).await;
        h.pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Invalidate))
            .await
            .unwrap();
        h.pipeline
            .cache()
            .set("k", json!("v1"), Duration::from_secs(3600))
            .await
            .unwrap();

        h.pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::InMemory, SwitchMode::Migrate))
            .await
            .unwrap();
        h.pipeline
            .cache()
            .set("k", json!("v2"), Duration::from_millis(100))
            .await
            .unwrap();
        h.clock.advance(Duration::from_millis(200));
        assert_eq!(h.pipeline.cache().get("k").await.unwrap(), None);

        let outcome = h
            .pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Migrate))
            .await
            .unwrap();
        assert_eq!(outcome.migrated, Some(0));
        assert_eq!(h.pipeline.cache().get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn migrate_file_to_file_keeps_entries() {
        let h = harness(false).await;
        h.pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Invalidate))
            .await
            .unwrap();
        h.pipeline
            .cache()
            .set("k", json!("kept"), Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = h
            .pipeline
            .switch_cache(SwitchRequest::new(CacheStrategy::File, SwitchMode::Migrate))
            .await
            .unwrap();
        assert_eq!(outcome.migrated, Some(1));
        assert_eq!(h.pipeline.cache().get("k").await.unwrap(), Some(json!("kept")));
    }
}
