//! Core worker implementation
//!
//! A worker loops on [`WorkQueue::try_take`] until the queue is empty. Each
//! item goes through the primary leg inline; a miss is handed to the run
//! context, which spawns the fallback task, and the worker moves straight on
//! to its next item. A failure or panic while processing one item is
//! contained to that item. Only a fatal session error ends the worker.
//! A faulted item counts as a miss and is deliberately not sent to the
//! fallback source.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::types::{WorkerExit, WorkerReport};
use crate::app::coordinator::context::{panic_message, RunContext, RunEvent};
use crate::app::models::{Item, Source};
use crate::app::queue::WorkQueue;
use crate::app::retrieval::{ItemRetrieval, PrimaryOutcome};
use crate::app::session::SessionHandle;
use crate::errors::{RunError, RunResult};

/// A single queue consumer
#[derive(Debug)]
pub struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    ctx: Arc<RunContext>,
    /// Session in use; acquired lazily when not supplied up front
    session: Option<SessionHandle>,
    /// Whether `session` was acquired by this worker and must be released
    owns_session: bool,
    items_taken: usize,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until the queue drains or the session breaks
    pub async fn run(mut self) -> WorkerReport {
        debug!("Worker {} starting", self.id);
        let exit = self.work_loop().await;

        if self.owns_session {
            if let Some(session) = self.session.take() {
                if let Err(e) = self.ctx.sessions().release(session).await {
                    debug!("Worker {} session did not close cleanly: {}", self.id, e);
                }
            }
        }

        let reason = match &exit {
            WorkerExit::QueueDrained => {
                info!("Worker {} finished after {} items", self.id, self.items_taken);
                None
            }
            WorkerExit::SessionFault(reason) => {
                warn!("Worker {} stopped: {}", self.id, reason);
                Some(reason.clone())
            }
        };
        self.ctx.emit(RunEvent::WorkerStopped {
            worker_id: self.id,
            reason,
        });

        WorkerReport {
            worker_id: self.id,
            items_taken: self.items_taken,
            exit,
        }
    }

    async fn work_loop(&mut self) -> WorkerExit {
        loop {
            let session = match &self.session {
                Some(session) => session.clone(),
                None => {
                    // no session is opened for a queue that is already empty
                    if self.queue.is_empty().await {
                        return WorkerExit::QueueDrained;
                    }
                    match self.ctx.sessions().acquire().await {
                        Ok(session) => {
                            self.owns_session = true;
                            self.session = Some(session.clone());
                            session
                        }
                        Err(e) => return WorkerExit::SessionFault(e.to_string()),
                    }
                }
            };

            let Some(item) = self.queue.try_take().await else {
                return WorkerExit::QueueDrained;
            };
            self.items_taken += 1;

            if let Err(reason) = self.process(&session, item).await {
                return WorkerExit::SessionFault(reason);
            }
        }
    }

    /// Primary leg for one item
    ///
    /// Returns `Err` only when the session is no longer usable.
    async fn process(&self, session: &SessionHandle, item: Item) -> Result<(), String> {
        let item_id = item.id();
        let name = item.name().to_string();

        self.ctx.register(&item);
        self.ctx.emit(RunEvent::ItemStarted {
            worker_id: self.id,
            name: name.clone(),
        });

        let mut retrieval = ItemRetrieval::new(item);
        let result = AssertUnwindSafe(self.ctx.retriever().run_primary(&**session, &mut retrieval))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(PrimaryOutcome::TransferStarted)) => {
                self.ctx.complete(item_id);
                self.ctx.record_transfer(&name, Source::Primary);
                Ok(())
            }
            Ok(Ok(PrimaryOutcome::Miss)) => {
                if let Err(e) = self.ctx.dispatch_fallback(retrieval) {
                    self.ctx.complete(item_id);
                    self.ctx.record_fault(&name, e.to_string());
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.ctx.complete(item_id);
                self.ctx.record_fault(&name, e.to_string());
                if e.is_session_fatal() {
                    Err(format!("session lost while processing '{}': {}", name, e))
                } else {
                    Ok(())
                }
            }
            Err(panic) => {
                self.ctx.complete(item_id);
                self.ctx.record_fault(&name, panic_message(panic.as_ref()));
                Ok(())
            }
        }
    }
}

/// Builder for creating Worker instances with validation
#[derive(Debug, Default)]
pub struct WorkerBuilder {
    id: Option<usize>,
    queue: Option<Arc<WorkQueue>>,
    ctx: Option<Arc<RunContext>>,
    session: Option<SessionHandle>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: usize) -> Self {
        self.id = Some(id);
        self
    }

    pub fn queue(mut self, queue: Arc<WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn context(mut self, ctx: Arc<RunContext>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Use an existing session instead of acquiring one; it is not released
    /// when the worker stops
    pub fn session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    /// Build the worker (validates all required fields are set)
    pub fn build(self) -> RunResult<Worker> {
        let id = self
            .id
            .ok_or_else(|| RunError::InvalidConfig("Worker ID is required".to_string()))?;
        let queue = self
            .queue
            .ok_or_else(|| RunError::InvalidConfig("Work queue is required".to_string()))?;
        let ctx = self
            .ctx
            .ok_or_else(|| RunError::InvalidConfig("Run context is required".to_string()))?;

        Ok(Worker {
            id,
            queue,
            ctx,
            session: self.session,
            owns_session: false,
            items_taken: 0,
        })
    }
}
