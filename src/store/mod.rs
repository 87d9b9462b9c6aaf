//! Persistence layer: durable archive of completed job results.

pub mod file;
pub mod traits;

pub use file::FileResultStore;
pub use traits::{ResultStore, StoredResult};
