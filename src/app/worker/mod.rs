//! Queue-draining workers
//!
//! Workers take items from the shared [`WorkQueue`](crate::app::queue::WorkQueue)
//! until it is empty, running the primary leg of each retrieval inline and
//! handing misses to the fallback source without waiting on them.
//!
//! # Module Organization
//!
//! - [`config`] - Serial/parallel mode and worker count
//! - [`types`] - Worker and pool reports
//! - [`core`] - Individual worker loop
//! - [`pool`] - Spawning and joining the workers of a run

pub mod config;
pub mod core;
pub mod pool;
pub mod types;

pub use config::{default_worker_count, ExecutionMode, WorkerConfig, WorkerConfigBuilder};
pub use core::{Worker, WorkerBuilder};
pub use pool::{PoolState, WorkerPool};
pub use types::{PoolReport, WorkerExit, WorkerReport};

#[cfg(test)]
mod tests;
