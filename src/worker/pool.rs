//! Worker pool: fixed set of execution units with crash recovery.
//!
//! Tasks wait in a FIFO queue until a unit is idle. Each dispatched task is
//! recorded in a correlation table keyed by task id; completions arrive
//! asynchronously on the event channel and resolve the matching caller. A unit
//! that exits while the pool is running is replaced at the same index, and only
//! the task bound to it is failed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::unit::{Unit, UnitCommand, UnitEvent, spawn_unit};
use crate::analyzer::{AnalysisResult, Analyzer};
use crate::error::PoolError;

type Reply = oneshot::Sender<Result<AnalysisResult, PoolError>>;

/// A task waiting for an idle unit.
struct QueuedTask {
    task_id: Uuid,
    content: String,
    reply: Reply,
}

/// A task bound to a unit, awaiting its completion event.
struct InFlight {
    unit: usize,
    generation: u64,
    reply: Reply,
}

/// Snapshot of pool state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub pool_size: usize,
    pub busy_workers: usize,
    pub queue_length: usize,
    pub is_shutting_down: bool,
}

#[derive(Default)]
struct PoolState {
    started: bool,
    shutting_down: bool,
    units: Vec<Option<Unit>>,
    queue: VecDeque<QueuedTask>,
    in_flight: HashMap<Uuid, InFlight>,
    events: Option<mpsc::UnboundedSender<UnitEvent>>,
    next_generation: u64,
}

impl PoolState {
    fn spawn_at(&mut self, index: usize, analyzer: &Arc<dyn Analyzer>) -> Result<(), PoolError> {
        let Some(events) = self.events.clone() else {
            return Err(PoolError::ShuttingDown);
        };
        self.next_generation += 1;
        let unit = spawn_unit(index, self.next_generation, Arc::clone(analyzer), events).map_err(
            |e| PoolError::SpawnFailed {
                index,
                reason: e.to_string(),
            },
        )?;
        self.units[index] = Some(unit);
        Ok(())
    }

    /// Bind queued tasks to idle units until one side runs out.
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(unit) = self.units.iter_mut().flatten().find(|u| u.is_idle()) else {
                return;
            };
            let Some(task) = self.queue.pop_front() else {
                return;
            };

            let command = UnitCommand::Analyze {
                task_id: task.task_id,
                content: task.content,
            };
            match unit.commands.send(command) {
                Ok(()) => {
                    unit.busy = Some(task.task_id);
                    self.in_flight.insert(
                        task.task_id,
                        InFlight {
                            unit: unit.index,
                            generation: unit.generation,
                            reply: task.reply,
                        },
                    );
                }
                Err(_) => {
                    warn!(task_id = %task.task_id, unit = unit.index, "Failed to send task to worker");
                    let _ = task.reply.send(Err(PoolError::DispatchFailed { index: unit.index }));
                }
            }
        }
    }

    fn on_completed(
        &mut self,
        index: usize,
        generation: u64,
        task_id: Uuid,
        outcome: Result<AnalysisResult, String>,
    ) {
        if let Some(Some(unit)) = self.units.get_mut(index)
            && unit.generation == generation
            && unit.busy == Some(task_id)
        {
            unit.busy = None;
        }

        match self.in_flight.remove(&task_id) {
            Some(in_flight) => {
                let _ = in_flight.reply.send(outcome.map_err(PoolError::Analysis));
            }
            None => warn!(%task_id, unit = index, "Completion for unknown task, ignoring"),
        }
    }

    fn on_exited(&mut self, index: usize, generation: u64, analyzer: &Arc<dyn Analyzer>) {
        if self.shutting_down {
            return;
        }
        let current = self.units.get(index).and_then(|u| u.as_ref());
        if current.is_none_or(|unit| unit.generation != generation) {
            debug!(unit = index, generation, "Stale worker exit, ignoring");
            return;
        }
        self.units[index] = None;

        // Fail every correlation entry bound to the dead unit before respawning.
        let orphaned: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.unit == index && f.generation == generation)
            .map(|(id, _)| *id)
            .collect();
        for task_id in orphaned {
            if let Some(in_flight) = self.in_flight.remove(&task_id) {
                warn!(%task_id, unit = index, "Failing task bound to exited worker");
                let _ = in_flight.reply.send(Err(PoolError::WorkerExited { index }));
            }
        }

        warn!(unit = index, "Worker exited unexpectedly, respawning");
        if let Err(e) = self.spawn_at(index, analyzer) {
            error!(unit = index, error = %e, "Failed to respawn worker");
        }
    }
}

/// Runs analysis on a fixed set of OS threads.
pub struct WorkerPool {
    analyzer: Arc<dyn Analyzer>,
    pool_size: usize,
    state: Arc<Mutex<PoolState>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WorkerPool {
    /// Create a pool of `pool_size` units (at least one). Call [`start`](Self::start)
    /// before tasks can run.
    pub fn new(analyzer: Arc<dyn Analyzer>, pool_size: usize) -> Self {
        Self {
            analyzer,
            pool_size: pool_size.max(1),
            state: Arc::new(Mutex::new(PoolState::default())),
            event_loop: Mutex::new(None),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Spawn the execution units. Calling it on a running pool only warns.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut state = lock(&self.state);
        if state.started {
            warn!("Worker pool already started");
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.events = Some(events_tx);
        state.shutting_down = false;
        state.units = (0..self.pool_size).map(|_| None).collect();

        for index in 0..self.pool_size {
            if let Err(e) = state.spawn_at(index, &self.analyzer) {
                state.units.clear();
                state.events = None;
                return Err(e);
            }
        }
        state.started = true;
        // Tasks submitted before start
        state.dispatch();
        drop(state);

        let handle = tokio::spawn(run_events(
            Arc::clone(&self.state),
            Arc::clone(&self.analyzer),
            events_rx,
        ));
        *self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        info!(pool_size = self.pool_size, "Worker pool started");
        Ok(())
    }

    /// Analyze `content` on a worker. Queues if every unit is busy.
    pub async fn analyze_text(&self, content: impl Into<String>) -> Result<AnalysisResult, PoolError> {
        let (reply, outcome) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if state.shutting_down {
                return Err(PoolError::ShuttingDown);
            }
            state.queue.push_back(QueuedTask {
                task_id: Uuid::new_v4(),
                content: content.into(),
                reply,
            });
            state.dispatch();
        }

        match outcome.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::ShuttingDown),
        }
    }

    /// Fail every queued and in-flight task, then terminate all units.
    pub fn shutdown(&self) {
        let units = {
            let mut state = lock(&self.state);
            if state.shutting_down {
                debug!("Worker pool already shutting down");
                return;
            }
            state.shutting_down = true;

            let queued = state.queue.len();
            let in_flight = state.in_flight.len();
            for task in state.queue.drain(..) {
                let _ = task.reply.send(Err(PoolError::ShuttingDown));
            }
            for (_, task) in state.in_flight.drain() {
                let _ = task.reply.send(Err(PoolError::ShuttingDown));
            }
            if queued + in_flight > 0 {
                info!(queued, in_flight, "Rejected outstanding worker tasks");
            }

            state.events = None;
            state.started = false;
            std::mem::take(&mut state.units)
        };

        if let Some(handle) = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }

        // Closing the command channels ends each unit thread.
        drop(units);
        info!("Worker pool shut down");
    }

    pub fn get_stats(&self) -> PoolStats {
        let state = lock(&self.state);
        PoolStats {
            pool_size: self.pool_size,
            busy_workers: state.units.iter().flatten().filter(|u| !u.is_idle()).count(),
            queue_length: state.queue.len(),
            is_shutting_down: state.shutting_down,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_events(
    state: Arc<Mutex<PoolState>>,
    analyzer: Arc<dyn Analyzer>,
    mut events: mpsc::UnboundedReceiver<UnitEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut pool = lock(&state);
        match event {
            UnitEvent::Completed {
                index,
                generation,
                task_id,
                outcome,
            } => pool.on_completed(index, generation, task_id, outcome),
            UnitEvent::Exited { index, generation } => pool.on_exited(index, generation, &analyzer),
        }
        pool.dispatch();
    }
}
