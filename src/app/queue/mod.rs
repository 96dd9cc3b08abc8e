//! Work queue for concurrent song retrieval
//!
//! The queue is a bag of pending [`Item`](crate::app::models::Item)s that is
//! seeded exactly once and then drained by the worker pool. Taking an item
//! removes it, so no two workers ever see the same item. Items are pulled on
//! demand rather than pre-partitioned, which lets surviving workers finish the
//! share of a worker that died.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use playlist_fetcher::app::models::prepare_items;
//! use playlist_fetcher::app::queue::WorkQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = WorkQueue::new();
//! queue.seed(prepare_items(["Artist1 - Song1", "Artist2 - Song2"])).await?;
//!
//! while let Some(item) = queue.try_take().await {
//!     println!("processing {}", item);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod types;

#[cfg(test)]
mod tests;

pub use core::WorkQueue;
pub use types::{QueueStats, WorkQueueConfig};
