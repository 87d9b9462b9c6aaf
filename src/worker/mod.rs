//! Worker pool: CPU-bound analysis off the scheduling runtime.
//!
//! Core components:
//! - `unit`: an execution unit (OS thread) and its command/event messages
//! - `pool`: dispatch, completion correlation, crash recovery, shutdown

pub mod pool;
mod unit;

pub use pool::{PoolStats, WorkerPool};
