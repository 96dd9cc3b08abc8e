//! Run orchestration
//!
//! The coordinator owns one run from start to finish: it prepares the output
//! directory, opens the primary session, seeds the queue, starts the worker
//! pool, waits for quiescence, tears every session down and finally strips
//! the primary site's suffix from the transferred files.
//!
//! # Architecture
//!
//! - [`config`] - Configuration structures and validation
//! - [`context`] - Shared per-run state: registry, fallback set, counters
//! - [`completion`] - Quiescence detection
//! - [`signals`] - Signal handling for interrupted runs
//! - [`stats`] - End-of-run summary
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use playlist_fetcher::app::{Coordinator, CoordinatorConfig, RetrievalConfig};
//! use playlist_fetcher::app::session::{SystemProcesses, WebDriverConfig, WebDriverFactory};
//!
//! # async fn example() -> playlist_fetcher::Result<()> {
//! let factory = Arc::new(WebDriverFactory::new(WebDriverConfig::default())?);
//! let coordinator = Coordinator::new(
//!     CoordinatorConfig::default().with_output_dir("/tmp/songs"),
//!     RetrievalConfig::default(),
//!     factory,
//!     Arc::new(SystemProcesses),
//! )?;
//!
//! let summary = coordinator.run(vec!["Queen - Bohemian Rhapsody".to_string()]).await?;
//! println!("{}", summary.summary());
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod context;
pub mod signals;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::app::cleanup::strip_site_suffix;
use crate::app::models::prepare_items;
use crate::app::output::prepare_output_directory;
use crate::app::playlist::{HttpLinkProbe, LinkProbe, PlaylistReader};
use crate::app::queue::WorkQueue;
use crate::app::retrieval::{RetrievalConfig, Retriever};
use crate::app::session::{ProcessControl, SessionFactory, SessionManager, SessionOptions};
use crate::app::worker::{PoolReport, WorkerPool};
use crate::errors::{Result, RunError};

pub use completion::{QuiescenceDetector, QuiescenceStatus, WaitOutcome};
pub use config::CoordinatorConfig;
pub use context::{CounterSnapshot, RunContext, RunEvent};
pub use signals::{create_shutdown_channel, wait_for_shutdown_signal, SignalHandler};
pub use stats::RunSummary;

/// Where the item names come from
enum RunInput<'a> {
    Names(Vec<String>),
    Playlist(&'a str),
}

/// Main coordinator for one run
pub struct Coordinator {
    config: CoordinatorConfig,
    retrieval: RetrievalConfig,
    factory: Arc<dyn SessionFactory>,
    processes: Arc<dyn ProcessControl>,
    link_probe: Arc<dyn LinkProbe>,
    events: Option<mpsc::Sender<RunEvent>>,
    shutdown_tx: broadcast::Sender<()>,
    handle_signals: bool,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(
        config: CoordinatorConfig,
        retrieval: RetrievalConfig,
        factory: Arc<dyn SessionFactory>,
        processes: Arc<dyn ProcessControl>,
    ) -> Result<Self> {
        let link_probe = Arc::new(HttpLinkProbe::new(config.link_probe_timeout)?);
        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            config,
            retrieval,
            factory,
            processes,
            link_probe,
            events: None,
            shutdown_tx,
            handle_signals: true,
        })
    }

    /// Send progress events to `events`
    pub fn with_events(mut self, events: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the playlist link probe
    pub fn with_link_probe(mut self, probe: Arc<dyn LinkProbe>) -> Self {
        self.link_probe = probe;
        self
    }

    /// Enable or disable Ctrl-C/SIGTERM handling during runs
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Sender that interrupts a running run, as a signal would
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Fetch every named song
    ///
    /// Blocks until the run is quiescent, every session is torn down and
    /// the cleanup pass is done.
    pub async fn run(&self, names: Vec<String>) -> Result<RunSummary> {
        self.execute(RunInput::Names(names)).await
    }

    /// Fetch every song listed on the playlist page at `link`
    pub async fn run_playlist(&self, link: &str) -> Result<RunSummary> {
        self.execute(RunInput::Playlist(link)).await
    }

    async fn execute(&self, input: RunInput<'_>) -> Result<RunSummary> {
        let clock = Instant::now();
        self.config.validate()?;

        match &input {
            RunInput::Playlist(link) => self.link_probe.probe(link).await?,
            RunInput::Names(names) if names.is_empty() => return Err(RunError::NoItems.into()),
            RunInput::Names(_) => {}
        }
        prepare_output_directory(&self.config.output_dir).await?;
        info!("Saving songs to {}", self.config.output_dir.display());

        let shutdown_rx = self.shutdown_tx.subscribe();
        let signal_task = self
            .handle_signals
            .then(|| SignalHandler::new(self.shutdown_tx.clone()).setup());

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.processes),
            SessionOptions {
                download_dir: self.config.output_dir.clone(),
                headless: self.config.headless,
                kill_existing: false,
            },
            self.config.helper_process_name.clone(),
        ));

        let outcome = self.drive(&sessions, input, shutdown_rx).await;
        let teardown = sessions.teardown().await;
        if let Some(task) = signal_task {
            task.abort();
        }

        let mut summary = outcome?;
        summary.teardown = teardown;
        summary.cleanup = strip_site_suffix(
            &self.config.output_dir,
            &self.config.site_suffix,
            &self.config.marker_suffixes,
        )
        .await;
        summary.elapsed = clock.elapsed();

        info!("{}", summary.summary());
        Ok(summary)
    }

    /// Everything between primary acquisition and the last fallback joining
    async fn drive(
        &self,
        sessions: &Arc<SessionManager>,
        input: RunInput<'_>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let primary = sessions
            .acquire_primary()
            .await
            .map_err(RunError::PrimarySession)?;

        let names = match input {
            RunInput::Names(names) => names,
            RunInput::Playlist(link) => {
                let names = PlaylistReader::new(self.retrieval.selectors.clone())
                    .read_names(&*primary, link)
                    .await?;
                if names.is_empty() {
                    return Err(RunError::EmptyPlaylist {
                        link: link.to_string(),
                    }
                    .into());
                }
                names
            }
        };

        let items = prepare_items(names);
        let total = items.len();
        let queue = Arc::new(WorkQueue::with_config(self.config.queue.clone()));
        queue.seed(items).await?;

        let ctx = Arc::new(RunContext::new(
            self.config.output_dir.clone(),
            self.config.marker_suffixes.clone(),
            Arc::clone(sessions),
            Retriever::new(self.retrieval.clone()),
            self.config.max_fallback_sessions,
            self.events.clone(),
        ));
        ctx.emit(RunEvent::Started {
            total,
            workers: self.config.worker.effective_workers(),
        });

        let mut pool = WorkerPool::new(
            self.config.worker.clone(),
            Arc::clone(&queue),
            Arc::clone(&ctx),
        );
        pool.start(Some(primary))?;

        let aborts = pool.abort_handles();
        let mut interrupted = false;
        let pool_report = tokio::select! {
            report = pool.join() => report,
            _ = wait_for_shutdown_signal(&mut shutdown_rx) => {
                warn!("Interrupted; stopping {} workers", aborts.len());
                for handle in &aborts {
                    handle.abort();
                }
                interrupted = true;
                PoolReport {
                    cancelled: aborts.len(),
                    ..Default::default()
                }
            }
        };

        if !interrupted {
            let mut detector = QuiescenceDetector::new(Arc::clone(&ctx), self.config.poll_interval)
                .with_shutdown(shutdown_rx);
            if detector.wait().await == WaitOutcome::Cancelled {
                interrupted = true;
            }
        }

        if interrupted {
            ctx.abort_fallbacks();
        }
        let abnormal = ctx.join_fallbacks().await;
        if abnormal > 0 && !interrupted {
            warn!("{} fallback tasks ended abnormally", abnormal);
        }

        let mut summary = RunSummary::from_counters(total, ctx.counters(), started_at);
        summary.abandoned = queue.remaining_names().await;
        summary.interrupted = interrupted;
        summary.output_dir = self.config.output_dir.clone();
        summary.pool = pool_report;
        Ok(summary)
    }
}
