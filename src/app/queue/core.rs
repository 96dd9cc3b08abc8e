//! Core work queue implementation

use std::collections::VecDeque;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::{QueueStats, WorkQueueConfig};
use crate::app::models::Item;
use crate::errors::{QueueError, QueueResult};

/// Thread-safe bag of pending items
///
/// All mutation happens under one async mutex, so `try_take` is atomic with
/// respect to every other caller.
#[derive(Debug)]
pub struct WorkQueue {
    config: WorkQueueConfig,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Item>,
    seeded: Option<usize>,
    taken: usize,
}

impl WorkQueue {
    /// Create an empty, unseeded queue
    pub fn new() -> Self {
        Self::with_config(WorkQueueConfig::default())
    }

    /// Create a queue with custom configuration
    pub fn with_config(config: WorkQueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Load the items to process
    ///
    /// Must be called once, before any worker starts.
    pub async fn seed(&self, items: Vec<Item>) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        if let Some(count) = state.seeded {
            return Err(QueueError::AlreadySeeded { count });
        }

        let count = items.len();
        state.pending = items.into();
        state.seeded = Some(count);

        info!("Seeded work queue with {} songs", count);
        Ok(count)
    }

    /// Remove and return one pending item, or `None` once the queue is empty
    pub async fn try_take(&self) -> Option<Item> {
        let mut state = self.state.lock().await;

        if state.pending.is_empty() {
            return None;
        }

        if !self.config.take_delay.is_zero() {
            tokio::time::sleep(self.config.take_delay).await;
        }

        let item = state.pending.pop_front()?;
        state.taken += 1;
        debug!(
            "Took '{}' from queue ({} remaining)",
            item,
            state.pending.len()
        );
        Some(item)
    }

    /// Number of items still waiting
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Whether no items are waiting
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    /// Names of the items still waiting, in queue order
    pub async fn remaining_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .map(|item| item.name().to_string())
            .collect()
    }

    /// Current statistics
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            seeded: state.seeded.unwrap_or(0),
            taken: state.taken,
            remaining: state.pending.len(),
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
