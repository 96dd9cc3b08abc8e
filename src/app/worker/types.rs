//! Worker and pool outcome types

use serde::{Deserialize, Serialize};

/// Why a worker stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerExit {
    /// `try_take` came back empty
    QueueDrained,
    /// The worker's session broke or could not be created
    SessionFault(String),
}

/// What one worker did before it stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    /// Items this worker took from the queue
    pub items_taken: usize,
    pub exit: WorkerExit,
}

/// Outcome of joining the whole pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
    /// Worker tasks that panicked outside item processing
    pub panicked: usize,
    /// Worker tasks aborted before finishing
    pub cancelled: usize,
}

impl PoolReport {
    /// Items taken across all workers that reported back
    pub fn items_taken(&self) -> usize {
        self.workers.iter().map(|w| w.items_taken).sum()
    }

    /// Workers that stopped because of their session
    pub fn session_faults(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.exit, WorkerExit::SessionFault(_)))
            .count()
    }

    /// Whether every worker drained the queue normally
    pub fn is_clean(&self) -> bool {
        self.panicked == 0 && self.cancelled == 0 && self.session_faults() == 0
    }
}
