//! Core application logic for Playlist Fetcher
//!
//! This module contains the work queue, the worker pool, the per-item
//! retrieval state machine, session management and the run coordinator that
//! ties them together.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use playlist_fetcher::app::{Coordinator, CoordinatorConfig, RetrievalConfig};
//! use playlist_fetcher::app::session::{SystemProcesses, WebDriverConfig, WebDriverFactory};
//!
//! # async fn example() -> playlist_fetcher::Result<()> {
//! let coordinator = Coordinator::new(
//!     CoordinatorConfig::default(),
//!     RetrievalConfig::default(),
//!     Arc::new(WebDriverFactory::new(WebDriverConfig::default())?),
//!     Arc::new(SystemProcesses),
//! )?;
//! let summary = coordinator.run_playlist("https://open.spotify.com/playlist/...").await?;
//! println!("{} songs transferred", summary.processed);
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod coordinator;
pub mod models;
pub mod output;
pub mod playlist;
pub mod queue;
pub mod retrieval;
pub mod session;
pub mod worker;

// Re-export main public API
pub use cleanup::{strip_site_suffix, CleanupReport};
pub use coordinator::{Coordinator, CoordinatorConfig, RunEvent, RunSummary};
pub use models::{normalize_item_name, prepare_items, Item, Source};
pub use output::{prepare_output_directory, session_output_dir};
pub use playlist::{HttpLinkProbe, LinkProbe, PlaylistReader};
pub use queue::{QueueStats, WorkQueue, WorkQueueConfig};
pub use retrieval::{RetrievalConfig, Retriever};
pub use session::{AutomationSession, SessionFactory, SessionManager};
pub use worker::{ExecutionMode, WorkerConfig, WorkerPool};
