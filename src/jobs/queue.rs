//! Job queue: FIFO pending list, bounded concurrent processing, and retries.
//!
//! The dispatcher pops jobs from the head of the pending list while fewer
//! than `concurrency` are active. Each popped job runs on its own task:
//!
//! ```text
//! queued ──▶ processing ──▶ completed
//!   ▲            │
//!   └── retry ◀──┴──▶ failed   (after max_retries)
//! ```
//!
//! Every transition writes a [`JobRecord`] to the active cache. A retry
//! re-enters the queue at the tail after an exponential backoff.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::model::{Job, JobRecord, JobStatus};
use super::timers::RetryTimers;
use crate::analyzer::{AnalysisResult, Analyzer};
use crate::cache::CacheHandle;
use crate::config::QueueConfig;
use crate::error::{Error, JobError};
use crate::metrics::QueueMetrics;
use crate::store::{ResultStore, StoredResult};
use crate::worker::WorkerPool;

/// Where analysis runs.
#[derive(Clone)]
pub enum AnalysisExecutor {
    /// On the processing task itself.
    InProcess(Arc<dyn Analyzer>),
    /// Offloaded to the worker pool.
    Pool(Arc<WorkerPool>),
}

impl AnalysisExecutor {
    pub async fn analyze(&self, content: &str) -> Result<AnalysisResult, Error> {
        match self {
            Self::InProcess(analyzer) => Ok(analyzer.analyze(content)?),
            Self::Pool(pool) => Ok(pool.analyze_text(content).await?),
        }
    }
}

/// Collaborators shared by every queue the pipeline builds.
#[derive(Clone)]
pub struct QueueDeps {
    pub cache: Arc<CacheHandle>,
    pub executor: AnalysisExecutor,
    pub metrics: Arc<QueueMetrics>,
    pub store: Option<Arc<dyn ResultStore>>,
}

/// What was left when [`JobQueue::shutdown`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Everything finished before the timeout.
    pub drained: bool,
    pub active: usize,
    pub queued: usize,
    pub pending_retries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub running: bool,
    pub pending: usize,
    pub active: usize,
    pub pending_retries: usize,
}

/// Work counters shared by a queue and every queue that replaces it, so a
/// drain check still sees jobs and retries started before a cache switch.
struct Outstanding {
    /// Jobs popped and not yet finished. Incremented under a `pending` lock.
    active: AtomicUsize,
    /// Signalled whenever active work or a retry timer finishes.
    drained: Arc<Notify>,
    retries: RetryTimers,
}

impl Outstanding {
    fn new() -> Arc<Self> {
        let drained = Arc::new(Notify::new());
        Arc::new(Self {
            active: AtomicUsize::new(0),
            retries: RetryTimers::new(Arc::clone(&drained)),
            drained,
        })
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct JobQueue {
    config: QueueConfig,
    cache: Arc<CacheHandle>,
    executor: AnalysisExecutor,
    metrics: Arc<QueueMetrics>,
    store: Option<Arc<dyn ResultStore>>,
    pending: Mutex<VecDeque<Job>>,
    running: AtomicBool,
    /// Wakes the dispatcher: new job or a free slot.
    wake: Notify,
    outstanding: Arc<Outstanding>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    /// Set once this queue has been replaced; enqueues forward to it.
    successor: OnceLock<Arc<JobQueue>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig, deps: QueueDeps) -> Arc<Self> {
        Self::with_outstanding(config, deps, Outstanding::new())
    }

    /// A fresh queue with the same configuration and collaborators that
    /// shares this queue's active, retry and concurrency accounting.
    pub fn replacement(&self) -> Arc<Self> {
        Self::with_outstanding(
            self.config.clone(),
            QueueDeps {
                cache: Arc::clone(&self.cache),
                executor: self.executor.clone(),
                metrics: Arc::clone(&self.metrics),
                store: self.store.clone(),
            },
            Arc::clone(&self.outstanding),
        )
    }

    fn with_outstanding(
        config: QueueConfig,
        deps: QueueDeps,
        outstanding: Arc<Outstanding>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache: deps.cache,
            executor: deps.executor,
            metrics: deps.metrics,
            store: deps.store,
            pending: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            outstanding,
            dispatcher: Mutex::new(None),
            successor: OnceLock::new(),
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `job` to the tail of the pending list. Never fails.
    pub fn enqueue(&self, job: Job) {
        let mut pending = self.lock_pending();
        if let Some(next) = self.successor.get() {
            drop(pending);
            debug!(job_id = %job.job_id, "Forwarding job to replacement queue");
            next.enqueue(job);
            return;
        }

        info!(job_id = %job.job_id, attempts = job.attempts, "Job enqueued");
        pending.push_back(job);
        drop(pending);
        self.wake.notify_one();
    }

    /// Begin dispatching. Calling it on a running queue does nothing.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = tokio::spawn(Arc::clone(self).run_dispatcher());
        let previous = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(concurrency = self.config.concurrency, "Job queue started");
    }

    /// Stop pulling new jobs. Active jobs keep running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
        info!("Job queue stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for active jobs, pending jobs and retry timers to reach zero, or
    /// for `timeout` to pass. Then stop dispatching and tear down the worker
    /// pool, if analysis runs on one. Leftover work is reported, not dropped.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        info!(timeout_ms = timeout.as_millis() as u64, "Shutting down job queue");
        let deadline = Instant::now() + timeout;

        let drained = loop {
            let notified = self.outstanding.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                break true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break self.is_idle();
            }
        };

        self.stop();
        let report = ShutdownReport {
            drained,
            active: self.outstanding.active(),
            queued: self.lock_pending().len(),
            pending_retries: self.outstanding.retries.pending(),
        };
        if drained {
            info!("Job queue drained");
        } else {
            warn!(
                active = report.active,
                queued = report.queued,
                pending_retries = report.pending_retries,
                "Job queue shutdown timed out with work remaining"
            );
        }

        if let AnalysisExecutor::Pool(pool) = &self.executor {
            pool.shutdown();
        }
        report
    }

    /// Stop this queue and hand its pending jobs to `next`, in order.
    /// Retries that fire later are forwarded too. Returns how many jobs moved.
    pub fn retire_into(&self, next: &Arc<JobQueue>) -> usize {
        self.stop();
        let mut pending = self.lock_pending();
        if self.successor.set(Arc::clone(next)).is_err() {
            warn!("Job queue already retired");
        }
        let moved = pending.len();
        for job in pending.drain(..) {
            next.enqueue(job);
        }
        drop(pending);

        if moved > 0 {
            info!(moved, "Moved pending jobs to replacement queue");
        }
        moved
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            running: self.is_running(),
            pending: self.lock_pending().len(),
            active: self.outstanding.active(),
            pending_retries: self.outstanding.retries.pending(),
        }
    }

    fn is_idle(&self) -> bool {
        let pending = self.lock_pending();
        pending.is_empty()
            && self.outstanding.active() == 0
            && self.outstanding.retries.pending() == 0
    }

    /// Pop the head job if a slot is free.
    fn next_job(&self) -> Option<Job> {
        let mut pending = self.lock_pending();
        if self.outstanding.active() >= self.config.concurrency {
            return None;
        }
        let job = pending.pop_front()?;
        self.outstanding.active.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    async fn run_dispatcher(self: Arc<Self>) {
        while self.is_running() {
            while let Some(job) = self.next_job() {
                tokio::spawn(Arc::clone(&self).process(job));
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.idle_poll_interval) => {}
            }
        }
        debug!("Job dispatcher exited");
    }

    async fn process(self: Arc<Self>, mut job: Job) {
        job.transition_to(JobStatus::Processing);
        info!(job_id = %job.job_id, attempt = job.attempts + 1, "Processing job");
        self.metrics.worker_started();
        let started = Instant::now();

        match self.attempt(&job).await {
            Ok(()) => {
                job.transition_to(JobStatus::Completed);
                let elapsed = started.elapsed();
                self.metrics.record_success(elapsed);
                info!(
                    job_id = %job.job_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
            }
            Err(e) => self.handle_failure(job, e).await,
        }

        self.metrics.worker_finished();
        self.outstanding.active.fetch_sub(1, Ordering::SeqCst);
        // The freed slot is shared; wake the newest generation too.
        let mut queue: &JobQueue = &self;
        queue.wake.notify_one();
        while let Some(next) = queue.successor.get() {
            queue = next;
            queue.wake.notify_one();
        }
        self.outstanding.drained.notify_waiters();
    }

    /// One processing attempt. Both cache writes are part of the attempt.
    /// The result is archived before the `completed` record becomes visible.
    async fn attempt(&self, job: &Job) -> Result<(), Error> {
        self.cache
            .current()
            .set(
                &job.status_key(),
                JobRecord::from_job(job).to_value(),
                self.config.processing_ttl,
            )
            .await?;

        let result = self.executor.analyze(&job.article.content).await?;
        self.archive(job, result.clone()).await;

        let mut record = JobRecord::from_job(job).with_result(result);
        record.status = JobStatus::Completed;
        self.cache
            .current()
            .set(&job.status_key(), record.to_value(), self.config.result_ttl)
            .await
            .map_err(Error::from)
    }

    async fn handle_failure(self: &Arc<Self>, mut job: Job, cause: Error) {
        job.attempts += 1;

        if job.attempts <= self.config.max_retries {
            job.transition_to(JobStatus::Queued);
            self.write_best_effort(&job, cause.to_string(), self.config.queued_ttl)
                .await;
            self.metrics.record_retry();

            let delay = self.config.retry_delay(job.attempts);
            warn!(
                job_id = %job.job_id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "Job attempt failed, retrying"
            );
            let queue = Arc::clone(self);
            self.outstanding.retries.schedule(delay, move || queue.enqueue(job));
        } else {
            job.transition_to(JobStatus::Failed);
            let exhausted = JobError::Exhausted {
                id: job.job_id.clone(),
                attempts: job.attempts,
                reason: cause.to_string(),
            };
            self.write_best_effort(&job, exhausted.to_string(), self.config.result_ttl)
                .await;
            self.metrics.record_failure();
            error!(job_id = %job.job_id, error = %exhausted, "Job failed permanently");
        }
    }

    async fn write_best_effort(&self, job: &Job, error: String, ttl: Duration) {
        let record = JobRecord::from_job(job).with_error(error);
        if let Err(e) = self
            .cache
            .current()
            .set(&job.status_key(), record.to_value(), ttl)
            .await
        {
            warn!(job_id = %job.job_id, status = %job.status, error = %e, "Failed to record job status");
        }
    }

    async fn archive(&self, job: &Job, result: AnalysisResult) {
        let Some(store) = &self.store else {
            return;
        };
        let stored = StoredResult {
            job_id: job.job_id.clone(),
            article_id: job.article.id.clone(),
            title: job.article.title.clone(),
            attempts: job.attempts,
            result,
            created_at: job.created_at,
            completed_at: Utc::now(),
        };
        if let Err(e) = store.save_job_result(&stored).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to archive job result");
        }
    }
}
