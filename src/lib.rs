//! Article analyzer: queued text analysis over a swappable cache.

pub mod analyzer;
pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod worker;
