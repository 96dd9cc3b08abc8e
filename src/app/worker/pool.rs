//! Worker pool management and coordination
//!
//! The pool spawns the workers for one run and joins them. It owns no
//! sessions itself: in serial mode the single worker borrows the primary
//! session, in parallel mode every worker acquires its own.

use std::sync::Arc;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::core::WorkerBuilder;
use super::types::{PoolReport, WorkerReport};
use crate::app::coordinator::context::RunContext;
use crate::app::queue::WorkQueue;
use crate::app::session::SessionHandle;
use crate::errors::{RunError, RunResult};

/// Current state of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Pool has been created but not started
    Created,
    /// Workers are running
    Running,
    /// Pool is being joined
    ShuttingDown,
    /// Every worker has been joined
    Shutdown,
}

/// Pool for the workers of one run
#[derive(Debug)]
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<WorkQueue>,
    ctx: Arc<RunContext>,
    handles: Vec<(usize, JoinHandle<WorkerReport>)>,
    state: PoolState,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, queue: Arc<WorkQueue>, ctx: Arc<RunContext>) -> Self {
        Self {
            config,
            queue,
            ctx,
            handles: Vec::new(),
            state: PoolState::Created,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Number of workers spawned
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Spawn the workers
    ///
    /// `primary` is handed to the worker in serial mode; without it that
    /// worker acquires a session of its own.
    pub fn start(&mut self, primary: Option<SessionHandle>) -> RunResult<()> {
        if self.state != PoolState::Created {
            return Err(RunError::InvalidState(format!(
                "Cannot start pool in state: {:?}",
                self.state
            )));
        }
        self.config.validate()?;

        let count = self.config.effective_workers();
        info!(
            "Starting {} workers ({:?} mode)",
            count, self.config.mode
        );

        for worker_id in 0..count {
            let mut builder = WorkerBuilder::new()
                .id(worker_id)
                .queue(Arc::clone(&self.queue))
                .context(Arc::clone(&self.ctx));
            if !self.config.is_parallel() {
                if let Some(session) = primary.clone() {
                    builder = builder.session(session);
                }
            }
            let worker = builder.build()?;

            let handle = tokio::spawn(worker.run());
            self.handles.push((worker_id, handle));
        }

        self.state = PoolState::Running;
        Ok(())
    }

    /// Handles that abort the worker tasks without consuming the pool
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        self.handles
            .iter()
            .map(|(_, handle)| handle.abort_handle())
            .collect()
    }

    /// Wait for every worker to stop
    pub async fn join(mut self) -> PoolReport {
        if self.state != PoolState::Running {
            warn!("Joining pool in state: {:?}", self.state);
        }
        self.state = PoolState::ShuttingDown;

        let mut report = PoolReport::default();
        for (worker_id, handle) in std::mem::take(&mut self.handles) {
            match handle.await {
                Ok(worker) => report.workers.push(worker),
                Err(e) if e.is_panic() => {
                    warn!("Worker {} panicked", worker_id);
                    report.panicked += 1;
                }
                Err(e) => {
                    debug!("Worker {} was cancelled: {}", worker_id, e);
                    report.cancelled += 1;
                }
            }
        }

        self.state = PoolState::Shutdown;
        info!(
            "Worker pool finished: {} items taken by {} workers",
            report.items_taken(),
            report.workers.len()
        );
        report
    }
}
