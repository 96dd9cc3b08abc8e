//! Shared state of one run
//!
//! A [`RunContext`] is created per run and handed to every worker and
//! fallback task as an `Arc`. It owns the in-flight registry, the fallback
//! in-flight set, the join set of fallback tasks and the run counters.
//!
//! An item is in exactly one of three places while it is being worked on: the
//! registry (primary leg running), the fallback set (fallback task pending or
//! running), or neither (finished). The hand-off inserts into the fallback set
//! before removing from the registry, so an observer never sees the item in
//! neither place while it still has work left.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::app::models::{Item, Source};
use crate::app::retrieval::{ItemRetrieval, RetrievalState, Retriever};
use crate::app::session::SessionManager;
use crate::errors::RetrievalResult;

/// Progress notifications emitted during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Items were seeded and workers are starting
    Started { total: usize, workers: usize },
    /// A worker picked up an item
    ItemStarted { worker_id: usize, name: String },
    /// A transfer was started
    TransferStarted { name: String, source: Source },
    /// The primary source missed; a fallback task was spawned
    FallbackDispatched { name: String },
    /// A fallback task ended without starting a transfer
    FallbackFailed { name: String, reason: String },
    /// The primary leg failed with an error or panic
    ItemFaulted { name: String, reason: String },
    /// A worker exited
    WorkerStopped {
        worker_id: usize,
        reason: Option<String>,
    },
    /// Workers are done but fallbacks are still outstanding
    WaitingForFallbacks { outstanding: Vec<String> },
    /// Nothing left pending, in flight or mid-transfer
    Quiescent,
}

/// Relaxed run counters
#[derive(Debug, Default)]
pub struct RunCounters {
    processed: AtomicUsize,
    primary_transfers: AtomicUsize,
    fallback_dispatched: AtomicUsize,
    fallback_transfers: AtomicUsize,
    fallback_failures: AtomicUsize,
    faults: AtomicUsize,
}

/// Point-in-time copy of [`RunCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Items whose transfer was started, on either source
    pub processed: usize,
    pub primary_transfers: usize,
    pub fallback_dispatched: usize,
    pub fallback_transfers: usize,
    pub fallback_failures: usize,
    /// Items whose primary leg ended in an error or panic
    pub faults: usize,
}

impl RunCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            primary_transfers: self.primary_transfers.load(Ordering::Relaxed),
            fallback_dispatched: self.fallback_dispatched.load(Ordering::Relaxed),
            fallback_transfers: self.fallback_transfers.load(Ordering::Relaxed),
            fallback_failures: self.fallback_failures.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

type ItemSet = Arc<Mutex<HashMap<u64, Item>>>;

fn lock(set: &ItemSet) -> MutexGuard<'_, HashMap<u64, Item>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Membership of one item in the fallback in-flight set
///
/// Dropping the ticket removes the item, whether the fallback task finished,
/// failed, panicked or was aborted.
#[derive(Debug)]
pub struct FallbackTicket {
    set: ItemSet,
    item_id: u64,
}

impl Drop for FallbackTicket {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.item_id);
    }
}

/// Shared state of one run
pub struct RunContext {
    output_dir: PathBuf,
    marker_suffixes: Vec<String>,
    sessions: Arc<SessionManager>,
    retriever: Retriever,
    fallback_permits: Arc<Semaphore>,
    in_flight: ItemSet,
    fallback: ItemSet,
    fallback_tasks: Mutex<JoinSet<()>>,
    counters: RunCounters,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl RunContext {
    /// Create the context for one run
    pub fn new(
        output_dir: impl Into<PathBuf>,
        marker_suffixes: Vec<String>,
        sessions: Arc<SessionManager>,
        retriever: Retriever,
        max_fallback_sessions: usize,
        events: Option<mpsc::Sender<RunEvent>>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            marker_suffixes,
            sessions,
            retriever,
            fallback_permits: Arc::new(Semaphore::new(max_fallback_sessions.max(1))),
            in_flight: ItemSet::default(),
            fallback: ItemSet::default(),
            fallback_tasks: Mutex::new(JoinSet::new()),
            counters: RunCounters::default(),
            events,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn marker_suffixes(&self) -> &[String] {
        &self.marker_suffixes
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Send a progress event; dropped if nobody is listening or the channel is full
    pub fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.try_send(event);
        }
    }

    /// Record that a worker is processing `item`
    pub fn register(&self, item: &Item) {
        lock(&self.in_flight).insert(item.id(), item.clone());
    }

    /// Remove `item_id` from the registry
    pub fn complete(&self, item_id: u64) {
        lock(&self.in_flight).remove(&item_id);
    }

    /// Number of items in the registry
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Number of items in the fallback set
    pub fn fallback_count(&self) -> usize {
        lock(&self.fallback).len()
    }

    /// Names of the items in the fallback set, sorted
    pub fn fallback_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.fallback)
            .values()
            .map(|item| item.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Record a transfer started by a worker or fallback task
    pub fn record_transfer(&self, name: &str, source: Source) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        match source {
            Source::Primary => &self.counters.primary_transfers,
            Source::Fallback => &self.counters.fallback_transfers,
        }
        .fetch_add(1, Ordering::Relaxed);

        self.emit(RunEvent::TransferStarted {
            name: name.to_string(),
            source,
        });
    }

    /// Record a primary-leg error or panic
    pub fn record_fault(&self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Giving up on '{}': {}", name, reason);
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
        self.emit(RunEvent::ItemFaulted {
            name: name.to_string(),
            reason,
        });
    }

    fn record_fallback_failure(&self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Fallback for '{}' failed: {}", name, reason);
        self.counters.fallback_failures.fetch_add(1, Ordering::Relaxed);
        self.emit(RunEvent::FallbackFailed {
            name: name.to_string(),
            reason,
        });
    }

    /// Move a missed item from the registry to the fallback set and spawn
    /// its fallback task
    pub fn dispatch_fallback(self: &Arc<Self>, mut retrieval: ItemRetrieval) -> RetrievalResult<()> {
        retrieval.advance(RetrievalState::FallbackDispatch)?;
        let item = retrieval.item().clone();

        lock(&self.fallback).insert(item.id(), item.clone());
        let ticket = FallbackTicket {
            set: Arc::clone(&self.fallback),
            item_id: item.id(),
        };
        self.complete(item.id());

        self.counters
            .fallback_dispatched
            .fetch_add(1, Ordering::Relaxed);
        self.emit(RunEvent::FallbackDispatched {
            name: item.name().to_string(),
        });
        debug!("Dispatched '{}' to fallback source", item);

        let ctx = Arc::clone(self);
        self.fallback_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(run_fallback(ctx, retrieval, ticket));
        Ok(())
    }

    /// Wait for every fallback task, including ones spawned while waiting
    ///
    /// Returns the number of tasks that panicked or were cancelled.
    pub async fn join_fallbacks(&self) -> usize {
        let mut abnormal = 0;
        loop {
            let mut tasks = {
                let mut guard = self
                    .fallback_tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::replace(&mut *guard, JoinSet::new())
            };
            if tasks.is_empty() {
                return abnormal;
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    debug!("Fallback task ended abnormally: {}", e);
                    abnormal += 1;
                }
            }
        }
    }

    /// Abort every running fallback task
    pub fn abort_fallbacks(&self) {
        self.fallback_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("output_dir", &self.output_dir)
            .field("in_flight", &self.in_flight_count())
            .field("fallback", &self.fallback_count())
            .field("counters", &self.counters())
            .finish()
    }
}

/// Fallback task: dedicated session, search, convert, release
async fn run_fallback(ctx: Arc<RunContext>, mut retrieval: ItemRetrieval, _ticket: FallbackTicket) {
    let name = retrieval.item().name().to_string();

    let _permit = match Arc::clone(&ctx.fallback_permits).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            ctx.record_fallback_failure(&name, "fallback sessions closed");
            return;
        }
    };

    let session = match ctx.sessions.acquire().await {
        Ok(session) => session,
        Err(e) => {
            let _ = retrieval.advance(RetrievalState::FallbackFailed);
            ctx.record_fallback_failure(&name, format!("no session: {}", e));
            return;
        }
    };

    let result = AssertUnwindSafe(ctx.retriever.run_fallback(&*session, &mut retrieval))
        .catch_unwind()
        .await;
    match result {
        Ok(Ok(())) => ctx.record_transfer(&name, Source::Fallback),
        Ok(Err(e)) => ctx.record_fallback_failure(&name, e.to_string()),
        Err(panic) => ctx.record_fallback_failure(&name, panic_message(panic.as_ref())),
    }

    if let Err(e) = ctx.sessions.release(session).await {
        debug!("Fallback session for '{}' did not close cleanly: {}", name, e);
    }
    info!("Fallback for '{}' finished", name);
}

/// Human-readable payload of a caught panic
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::retrieval::RetrievalConfig;
    use crate::app::session::scripted::{FallbackScript, ScriptedProcesses, ScriptedWeb};
    use crate::app::session::SessionOptions;

    fn context(web: &ScriptedWeb) -> Arc<RunContext> {
        let sessions = Arc::new(SessionManager::new(
            web.factory(),
            Arc::new(ScriptedProcesses::default()),
            SessionOptions {
                download_dir: web.download_dir().to_path_buf(),
                headless: true,
                kill_existing: false,
            },
            "chromedriver",
        ));
        Arc::new(RunContext::new(
            web.download_dir(),
            vec![".crdownload".to_string()],
            sessions,
            Retriever::new(RetrievalConfig::default()),
            2,
            None,
        ))
    }

    fn missed(item: Item) -> ItemRetrieval {
        let mut retrieval = ItemRetrieval::new(item);
        retrieval.advance(RetrievalState::PrimarySearch).unwrap();
        retrieval.advance(RetrievalState::PrimaryMiss).unwrap();
        retrieval
    }

    #[test]
    fn test_registry_tracks_duplicates_by_id() {
        let web = ScriptedWeb::new().unwrap();
        let ctx = context(&web);
        let a = Item::new(0, "Same - Song");
        let b = Item::new(1, "Same - Song");

        ctx.register(&a);
        ctx.register(&b);
        assert_eq!(ctx.in_flight_count(), 2);

        ctx.complete(a.id());
        assert_eq!(ctx.in_flight_count(), 1);
        ctx.complete(b.id());
        assert_eq!(ctx.in_flight_count(), 0);
    }

    #[test]
    fn test_ticket_drop_clears_fallback_entry() {
        let set = ItemSet::default();
        lock(&set).insert(7, Item::new(7, "A - B"));
        let ticket = FallbackTicket {
            set: Arc::clone(&set),
            item_id: 7,
        };
        assert_eq!(lock(&set).len(), 1);
        drop(ticket);
        assert!(lock(&set).is_empty());
    }

    /// Test registry to fallback hand-off
    ///
    /// Verifies that a dispatched item leaves the registry, enters the
    /// fallback set, and leaves the fallback set exactly once when its task
    /// finishes.
    #[tokio::test]
    async fn test_dispatch_moves_item_exactly_once() {
        let web = ScriptedWeb::new().unwrap();
        web.fallback("A - Rare", FallbackScript::Hit)
            .fallback("B - Gone", FallbackScript::NoResults);
        let ctx = context(&web);

        for item in [Item::new(0, "A - Rare"), Item::new(1, "B - Gone")] {
            ctx.register(&item);
            ctx.dispatch_fallback(missed(item)).unwrap();
        }
        assert_eq!(ctx.in_flight_count(), 0);

        assert_eq!(ctx.join_fallbacks().await, 0);
        assert_eq!(ctx.fallback_count(), 0);

        let counters = ctx.counters();
        assert_eq!(counters.fallback_dispatched, 2);
        assert_eq!(counters.fallback_transfers, 1);
        assert_eq!(counters.fallback_failures, 1);
        assert_eq!(counters.processed, 1);
        assert_eq!(web.fallback_searches().len(), 2);
        // dedicated sessions are released when their task ends
        assert_eq!(ctx.sessions().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_aborted_fallback_still_clears_set() {
        let web = ScriptedWeb::new().unwrap();
        let ctx = context(&web);
        // hold every permit so the task parks before doing any work
        let permits = ctx.fallback_permits.clone();
        let _held = permits.acquire_many(2).await.unwrap();

        let item = Item::new(0, "A - Stuck");
        ctx.register(&item);
        ctx.dispatch_fallback(missed(item)).unwrap();
        assert_eq!(ctx.fallback_names(), vec!["A - Stuck".to_string()]);

        ctx.abort_fallbacks();
        assert_eq!(ctx.join_fallbacks().await, 1);
        assert_eq!(ctx.fallback_count(), 0);
    }

    #[test]
    fn test_dispatch_requires_primary_miss() {
        let web = ScriptedWeb::new().unwrap();
        let ctx = context(&web);
        let retrieval = ItemRetrieval::new(Item::new(0, "A - B"));
        assert!(ctx.dispatch_fallback(retrieval).is_err());
        assert_eq!(ctx.fallback_count(), 0);
    }

    #[test]
    fn test_panic_message_extracts_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "panicked: bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "panicked");
    }
}
