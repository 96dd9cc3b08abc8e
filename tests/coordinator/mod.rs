//! End-to-end runs against the scripted browser backend
//!
//! Each test builds a real coordinator (queue, worker pool, session manager,
//! quiescence detector, cleanup) over [`ScriptedWeb`], so only the browser
//! and the sites it visits are simulated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::timeout;

use playlist_fetcher::app::session::scripted::{
    FallbackScript, PrimaryScript, ScriptedProcesses, ScriptedWeb, PLAYLIST_URL,
};
use playlist_fetcher::app::worker::WorkerConfigBuilder;
use playlist_fetcher::app::{
    Coordinator, CoordinatorConfig, LinkProbe, RetrievalConfig, RunSummary, Source,
};
use playlist_fetcher::errors::{AppError, RunError, RunResult};

const RUN_TIMEOUT: Duration = Duration::from_secs(20);

/// Accepts every link
struct ReachableProbe;

#[async_trait]
impl LinkProbe for ReachableProbe {
    async fn probe(&self, _link: &str) -> RunResult<()> {
        Ok(())
    }
}

/// Rejects every link
struct UnreachableProbe;

#[async_trait]
impl LinkProbe for UnreachableProbe {
    async fn probe(&self, link: &str) -> RunResult<()> {
        Err(RunError::LinkUnreachable {
            link: link.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

struct Fixture {
    _dir: TempDir,
    web: ScriptedWeb,
    processes: Arc<ScriptedProcesses>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let web = ScriptedWeb::with_download_dir(dir.path().join("session"));
        let processes = Arc::new(ScriptedProcesses::default());
        web.spawn_helpers_in(processes.clone())
            .transfer_delay(Duration::from_millis(30));
        Self {
            _dir: dir,
            web,
            processes,
        }
    }

    fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_output_dir(self.web.download_dir())
            .with_poll_interval(Duration::from_millis(10))
            .with_max_fallback_sessions(2)
    }

    fn coordinator(&self, config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(
            config,
            RetrievalConfig::default(),
            self.web.factory(),
            self.processes.clone(),
        )
        .unwrap()
        .with_signal_handling(false)
        .with_link_probe(Arc::new(ReachableProbe))
    }

    fn assert_torn_down(&self) {
        assert_eq!(self.web.open_sessions(), 0, "sessions left open");
        assert_eq!(self.processes.running("chromedriver"), 0, "helpers left running");
    }
}

async fn run_names(coordinator: &Coordinator, names: &[&str]) -> playlist_fetcher::Result<RunSummary> {
    let names = names.iter().map(|n| n.to_string()).collect();
    timeout(RUN_TIMEOUT, coordinator.run(names))
        .await
        .expect("run did not finish")
}

/// Test a serial run mixing every outcome
///
/// Verifies that primary hits and fallback hits count as processed, that a
/// fallback failure and an item fault count as misses, that only primary
/// misses reach the fallback source, and that everything is torn down.
#[tokio::test]
async fn test_serial_run_mixed_outcomes() {
    let f = Fixture::new();
    f.web
        .primary("A - One", PrimaryScript::Hit)
        .primary("B - Two", PrimaryScript::NotFound)
        .fallback("B - Two", FallbackScript::Hit)
        .primary("C - Three", PrimaryScript::NoTarget)
        .fallback("C - Three", FallbackScript::NoResults)
        .primary("D - Four", PrimaryScript::Error);
    let coordinator = f.coordinator(f.config());

    let summary = run_names(&coordinator, &["A - One", "B - Two", "C - Three", "D - Four"])
        .await
        .unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.primary_transfers, 1);
    assert_eq!(summary.fallback_dispatched, 2);
    assert_eq!(summary.fallback_transfers, 1);
    assert_eq!(summary.fallback_failures, 1);
    assert_eq!(summary.faults, 1);
    assert_eq!(summary.misses(), 2);
    assert!(!summary.interrupted);
    assert!(summary.abandoned.is_empty());

    let mut searched = f.web.fallback_searches();
    searched.sort();
    assert_eq!(searched, vec!["B - Two".to_string(), "C - Three".to_string()]);
    f.assert_torn_down();
}

/// Test a serial run where the primary source has every song
///
/// Verifies that nothing reaches the fallback source and that both files
/// end up without the site suffix.
#[tokio::test]
async fn test_serial_run_all_primary_hits() {
    let f = Fixture::new();
    f.web
        .primary("A - One", PrimaryScript::Hit)
        .primary("B - Two", PrimaryScript::Hit);
    let coordinator = f.coordinator(f.config());

    let summary = run_names(&coordinator, &["A - One", "B - Two"]).await.unwrap();
    let dir = f.web.download_dir();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.primary_transfers, 2);
    assert_eq!(summary.fallback_dispatched, 0);
    assert!(f.web.fallback_searches().is_empty());
    assert_eq!(summary.cleanup.renamed, 2);

    let mut files: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["A - One.mp3".to_string(), "B - Two.mp3".to_string()]);
    f.assert_torn_down();
}

/// Test post-run file name cleanup
///
/// Verifies that the run only returns once every transfer has finished and
/// that primary-source files lose the site suffix.
#[tokio::test]
async fn test_run_waits_for_transfers_and_strips_suffix() {
    let f = Fixture::new();
    f.web
        .transfer_delay(Duration::from_millis(200))
        .primary("A - One", PrimaryScript::Hit)
        .primary("B - Two", PrimaryScript::NotFound)
        .fallback("B - Two", FallbackScript::Hit);
    let coordinator = f.coordinator(f.config());

    let summary = run_names(&coordinator, &["A - One", "B - Two"]).await.unwrap();
    let dir = f.web.download_dir();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.cleanup.renamed, 1);
    assert!(dir.join("A - One.mp3").exists());
    assert!(dir.join("B - Two.mp3").exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".crdownload") || name.contains("my-free-mp3s.com"))
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}

/// Test a parallel run
///
/// Verifies that parallel workers each open their own session, that every
/// item is processed exactly once, and that teardown closes all sessions
/// and kills every helper process, stray ones included.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_run_tears_everything_down() {
    let f = Fixture::new();
    f.processes.spawn("chromedriver", 2);
    let names: Vec<String> = (0..12).map(|i| format!("Artist - Song {}", i)).collect();
    for (i, name) in names.iter().enumerate() {
        if i % 3 == 0 {
            f.web.primary(name, PrimaryScript::NotFound).fallback(name, FallbackScript::Hit);
        } else {
            f.web.primary(name, PrimaryScript::Hit);
        }
    }
    let worker = WorkerConfigBuilder::new()
        .parallel(true)
        .worker_count(3)
        .build()
        .unwrap();
    let coordinator = f.coordinator(f.config().with_worker(worker));

    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let summary = run_names(&coordinator, &refs).await.unwrap();

    assert_eq!(summary.processed, 12);
    assert_eq!(summary.primary_transfers, 8);
    assert_eq!(summary.fallback_transfers, 4);
    assert_eq!(summary.pool.workers.len(), 3);
    assert_eq!(summary.pool.items_taken(), 12);

    let mut transferred: Vec<String> = f.web.transfers().into_iter().map(|(n, _)| n).collect();
    transferred.sort();
    transferred.dedup();
    assert_eq!(transferred.len(), 12);

    // primary plus one per worker plus one per fallback
    assert!(f.web.sessions_created() >= 4);
    assert!(f.processes.kills() >= 2);
    f.assert_torn_down();
}

/// Test a run from a playlist page
///
/// Verifies that track rows become "Artist - Title" items processed through
/// the normal pipeline.
#[tokio::test]
async fn test_playlist_run() {
    let f = Fixture::new();
    f.web
        .playlist(vec![
            ("Bohemian Rhapsody", "Queen"),
            ("Under Pressure", "Queen, David Bowie"),
        ])
        .primary("Queen - Bohemian Rhapsody", PrimaryScript::Hit)
        .primary("Queen - Under Pressure", PrimaryScript::Hit);
    let coordinator = f.coordinator(f.config());

    let summary = timeout(RUN_TIMEOUT, coordinator.run_playlist(PLAYLIST_URL))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.primary_transfers, 2);
    let sources: Vec<Source> = f.web.transfers().into_iter().map(|(_, s)| s).collect();
    assert_eq!(sources, vec![Source::Primary, Source::Primary]);
    f.assert_torn_down();
}

#[tokio::test]
async fn test_empty_playlist_is_an_error() {
    let f = Fixture::new();
    f.web.playlist(Vec::new());
    let coordinator = f.coordinator(f.config());

    let error = coordinator.run_playlist(PLAYLIST_URL).await.unwrap_err();
    assert!(matches!(error, AppError::Run(RunError::EmptyPlaylist { .. })));
    // the primary session was opened to read the page, and closed again
    assert_eq!(f.web.sessions_created(), 1);
    f.assert_torn_down();
}

#[tokio::test]
async fn test_unreachable_link_stops_before_any_session() {
    let f = Fixture::new();
    let coordinator = f
        .coordinator(f.config())
        .with_link_probe(Arc::new(UnreachableProbe));

    let error = coordinator.run_playlist("https://example.invalid/list").await.unwrap_err();
    assert!(matches!(error, AppError::Run(RunError::LinkUnreachable { .. })));
    assert_eq!(f.web.sessions_created(), 0);
    assert!(!f.web.download_dir().exists());
}

#[tokio::test]
async fn test_no_names_is_an_error() {
    let f = Fixture::new();
    let coordinator = f.coordinator(f.config());

    let error = coordinator.run(Vec::new()).await.unwrap_err();
    assert!(matches!(error, AppError::Run(RunError::NoItems)));
    assert_eq!(f.web.sessions_created(), 0);
}

#[tokio::test]
async fn test_unusable_output_directory() {
    let f = Fixture::new();
    let blocker = f.web.download_dir().with_extension("file");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let coordinator = f.coordinator(f.config().with_output_dir(&blocker));

    let error = run_names(&coordinator, &["A - One"]).await.unwrap_err();
    assert!(matches!(error, AppError::Run(RunError::DirectoryAccess { .. })));
    assert_eq!(f.web.sessions_created(), 0);
}

#[tokio::test]
async fn test_primary_session_failure() {
    let f = Fixture::new();
    f.web.fail_session_creation(true);
    let coordinator = f.coordinator(f.config());

    let error = run_names(&coordinator, &["A - One"]).await.unwrap_err();
    assert!(matches!(error, AppError::Run(RunError::PrimarySession(_))));
    f.assert_torn_down();
}

/// Test interrupting a run
///
/// Verifies that a shutdown signal while a transfer is still running ends
/// the run early with a summary marked as interrupted, and that sessions
/// and helpers are still torn down.
#[tokio::test]
async fn test_interrupt_during_quiescence_wait() {
    let f = Fixture::new();
    f.web
        .transfer_delay(Duration::from_secs(60))
        .primary("A - One", PrimaryScript::Hit);
    let coordinator = f.coordinator(f.config());
    let shutdown = coordinator.shutdown_sender();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = shutdown.send(());
    });
    let summary = run_names(&coordinator, &["A - One"]).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed, 1);
    assert!(summary.elapsed < Duration::from_secs(10));
    // the partial transfer is left alone
    assert_eq!(summary.cleanup.renamed, 0);
    f.assert_torn_down();
}
