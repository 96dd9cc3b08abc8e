//! Tests for workers and the worker pool
//!
//! Every test drives real workers against the scripted browser backend, so
//! the session manager, queue and run context are the production ones.

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::app::coordinator::context::RunContext;
use crate::app::models::{prepare_items, Source};
use crate::app::queue::WorkQueue;
use crate::app::retrieval::{RetrievalConfig, Retriever};
use crate::app::session::scripted::{FallbackScript, PrimaryScript, ScriptedProcesses, ScriptedWeb};
use crate::app::session::{SessionManager, SessionOptions};

struct Harness {
    web: ScriptedWeb,
    sessions: Arc<SessionManager>,
    ctx: Arc<RunContext>,
    queue: Arc<WorkQueue>,
}

async fn harness(web: ScriptedWeb, names: &[&str]) -> Harness {
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
    let ctx = Arc::new(RunContext::new(
        web.download_dir(),
        vec![".crdownload".to_string()],
        Arc::clone(&sessions),
        Retriever::new(RetrievalConfig::default()),
        4,
        None,
    ));
    let queue = Arc::new(WorkQueue::new());
    queue.seed(prepare_items(names.iter().copied())).await.unwrap();

    Harness {
        web,
        sessions,
        ctx,
        queue,
    }
}

fn parallel(count: usize) -> WorkerConfig {
    WorkerConfigBuilder::new()
        .parallel(true)
        .worker_count(count)
        .build()
        .unwrap()
}

/// Test serial processing on the primary session
///
/// Verifies that a serial pool runs a single worker on the supplied primary
/// session, opens no session of its own, and leaves the primary open.
#[tokio::test]
async fn test_serial_pool_reuses_primary_session() {
    let web = ScriptedWeb::new().unwrap();
    web.primary("A - One", PrimaryScript::Hit)
        .primary("B - Two", PrimaryScript::Hit);
    let h = harness(web, &["A - One", "B - Two"]).await;
    let primary = h.sessions.acquire_primary().await.unwrap();

    let mut pool = WorkerPool::new(WorkerConfig::default(), h.queue.clone(), h.ctx.clone());
    pool.start(Some(primary)).unwrap();
    assert_eq!(pool.worker_count(), 1);
    let report = pool.join().await;

    assert!(report.is_clean());
    assert_eq!(report.items_taken(), 2);
    assert_eq!(h.web.sessions_created(), 1);
    assert_eq!(h.sessions.open_sessions(), 1);
    assert_eq!(h.ctx.counters().primary_transfers, 2);
}

/// Test parallel workers acquire their own sessions
///
/// Verifies that each parallel worker that finds work opens a dedicated
/// session and releases it when the queue drains.
#[tokio::test]
async fn test_parallel_workers_release_their_sessions() {
    let web = ScriptedWeb::new().unwrap();
    let names = ["A - 1", "B - 2", "C - 3", "D - 4", "E - 5", "F - 6"];
    for name in names {
        web.primary(name, PrimaryScript::Hit);
    }
    let h = harness(web, &names).await;

    let mut pool = WorkerPool::new(parallel(3), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    let report = pool.join().await;

    assert_eq!(report.workers.len(), 3);
    assert_eq!(report.items_taken(), 6);
    assert!(h.web.sessions_created() <= 3);
    assert_eq!(h.sessions.open_sessions(), 0);
    assert_eq!(h.web.open_sessions(), 0);
    assert_eq!(h.ctx.counters().processed, 6);
}

#[tokio::test]
async fn test_workers_on_empty_queue_open_no_sessions() {
    let web = ScriptedWeb::new().unwrap();
    let h = harness(web, &[]).await;

    let mut pool = WorkerPool::new(parallel(4), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    let report = pool.join().await;

    assert_eq!(report.items_taken(), 0);
    assert_eq!(h.web.sessions_created(), 0);
}

/// Test per-item fault isolation
///
/// Verifies that an item whose primary leg errors or panics counts as a
/// miss, gets no fallback, and does not stop the worker from processing the
/// rest of the queue.
#[tokio::test]
async fn test_item_errors_and_panics_are_contained() {
    let web = ScriptedWeb::new().unwrap();
    web.primary("A - Error", PrimaryScript::Error)
        .primary("B - Panic", PrimaryScript::Panic)
        .primary("C - Fine", PrimaryScript::Hit);
    let h = harness(web, &["A - Error", "B - Panic", "C - Fine"]).await;

    let mut pool = WorkerPool::new(parallel(1), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    let report = pool.join().await;

    assert!(report.is_clean());
    assert_eq!(report.items_taken(), 3);
    let counters = h.ctx.counters();
    assert_eq!(counters.faults, 2);
    assert_eq!(counters.processed, 1);
    assert_eq!(counters.fallback_dispatched, 0);
    assert_eq!(h.ctx.in_flight_count(), 0);
    assert_eq!(
        h.web.transfers(),
        vec![("C - Fine".to_string(), Source::Primary)]
    );
}

/// Test session loss ends only the affected worker
///
/// Verifies that a crashed session stops its worker with a session fault
/// while the remaining workers drain the queue.
#[tokio::test]
async fn test_session_crash_stops_worker() {
    let web = ScriptedWeb::new().unwrap();
    web.primary("A - Crash", PrimaryScript::Crash);
    let names = ["A - Crash", "B - 1", "C - 2", "D - 3"];
    for name in &names[1..] {
        web.primary(name, PrimaryScript::Hit);
    }
    let h = harness(web, &names).await;

    let mut pool = WorkerPool::new(parallel(2), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    let report = pool.join().await;

    assert_eq!(report.session_faults(), 1);
    assert_eq!(report.items_taken(), 4);
    assert!(h.queue.is_empty().await);
    assert_eq!(h.ctx.counters().primary_transfers, 3);
    assert_eq!(h.sessions.open_sessions(), 0);
}

#[tokio::test]
async fn test_session_creation_failure_leaves_items_queued() {
    let web = ScriptedWeb::new().unwrap();
    web.fail_session_creation(true);
    let h = harness(web, &["A - 1", "B - 2"]).await;

    let mut pool = WorkerPool::new(parallel(2), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    let report = pool.join().await;

    assert_eq!(report.session_faults(), 2);
    assert_eq!(report.items_taken(), 0);
    assert_eq!(h.queue.len().await, 2);
}

/// Test misses are handed off without blocking
///
/// Verifies that a primary miss is dispatched to the fallback source and the
/// worker keeps draining the queue while the fallback runs.
#[tokio::test]
async fn test_misses_dispatch_fallbacks() {
    let web = ScriptedWeb::new().unwrap();
    web.primary("B - Hit", PrimaryScript::Hit)
        .fallback("A - Miss", FallbackScript::Hit)
        .transfer_delay(Duration::from_millis(10));
    let h = harness(web, &["A - Miss", "B - Hit"]).await;

    let mut pool = WorkerPool::new(parallel(1), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    pool.join().await;
    assert_eq!(h.ctx.join_fallbacks().await, 0);

    let counters = h.ctx.counters();
    assert_eq!(counters.fallback_dispatched, 1);
    assert_eq!(counters.fallback_transfers, 1);
    assert_eq!(counters.processed, 2);
    assert_eq!(h.ctx.fallback_count(), 0);
}

#[tokio::test]
async fn test_pool_cannot_start_twice() {
    let web = ScriptedWeb::new().unwrap();
    let h = harness(web, &[]).await;

    let mut pool = WorkerPool::new(parallel(1), h.queue.clone(), h.ctx.clone());
    pool.start(None).unwrap();
    assert_eq!(pool.state(), PoolState::Running);
    assert!(pool.start(None).is_err());
    pool.join().await;
}

#[tokio::test]
async fn test_aborted_workers_are_counted_as_cancelled() {
    let web = ScriptedWeb::new().unwrap();
    let h = harness(web, &[]).await;
    // a long take delay parks the workers inside try_take
    let queue = Arc::new(WorkQueue::with_config(
        crate::app::queue::WorkQueueConfig::with_take_delay(Duration::from_secs(30)),
    ));
    queue.seed(prepare_items(["A - 1", "B - 2"])).await.unwrap();

    let mut pool = WorkerPool::new(parallel(2), queue, h.ctx.clone());
    pool.start(None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    for handle in pool.abort_handles() {
        handle.abort();
    }
    let report = pool.join().await;
    assert_eq!(report.cancelled, 2);
    assert!(report.workers.is_empty());
}
