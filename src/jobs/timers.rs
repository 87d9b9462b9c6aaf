//! Registry of delayed retry callbacks.
//!
//! Each scheduled callback counts as pending from the moment it is scheduled
//! until after it has run, so a drain check never sees a gap between a
//! failed attempt and its re-enqueue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

struct TimerState {
    entries: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    /// Signalled after each callback has run.
    settled: Arc<Notify>,
}

impl TimerState {
    fn entries(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) struct RetryTimers {
    state: Arc<TimerState>,
}

impl RetryTimers {
    /// `settled` is notified (all waiters) whenever a timer finishes.
    pub fn new(settled: Arc<Notify>) -> Self {
        Self {
            state: Arc::new(TimerState {
                entries: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(0),
                settled,
            }),
        }
    }

    /// Run `on_fire` after `delay`. Counted as pending immediately.
    pub fn schedule<F>(&self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::clone(&self.state);

        self.state.entries().insert(id);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
            state.entries().remove(&id);
            state.settled.notify_waiters();
        });
    }

    /// Timers scheduled but not yet finished.
    pub fn pending(&self) -> usize {
        self.state.entries().len()
    }
}
