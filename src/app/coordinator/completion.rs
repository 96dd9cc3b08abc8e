//! Quiescence detection
//!
//! A run is quiescent once three things hold together: no worker has an item
//! in the registry, the output directory holds no partial-transfer marker
//! files, and no fallback task is outstanding. The detector only observes
//! shared state; it never touches queue items or sessions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::context::{RunContext, RunEvent};
use super::signals::wait_for_shutdown_signal;
use crate::constants::run;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Quiescent,
    Cancelled,
}

/// Snapshot of everything the quiescence predicate looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuiescenceStatus {
    /// Items whose primary leg is running
    pub in_flight: usize,
    /// Partial-transfer files in the output directory
    pub markers: usize,
    /// Outstanding fallback tasks
    pub fallbacks: usize,
}

impl QuiescenceStatus {
    pub fn is_quiescent(&self) -> bool {
        self.in_flight == 0 && self.markers == 0 && self.fallbacks == 0
    }

    /// Get a human-readable status summary
    pub fn summary(&self) -> String {
        format!(
            "{} in flight, {} partial transfers, {} fallbacks outstanding",
            self.in_flight, self.markers, self.fallbacks
        )
    }
}

/// Polls the run state until it goes quiet
pub struct QuiescenceDetector {
    ctx: Arc<RunContext>,
    poll_interval: Duration,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl QuiescenceDetector {
    /// Create a new detector polling at `poll_interval`
    pub fn new(ctx: Arc<RunContext>, poll_interval: Duration) -> Self {
        Self {
            ctx,
            poll_interval,
            shutdown_rx: None,
        }
    }

    /// Stop waiting when a shutdown is broadcast
    pub fn with_shutdown(mut self, shutdown_rx: broadcast::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Evaluate the predicate once
    pub async fn status(&self) -> QuiescenceStatus {
        // registry first: an item leaving it for the fallback set is already
        // in that set, so it cannot slip between the two reads
        let in_flight = self.ctx.in_flight_count();
        let markers = count_markers(self.ctx.output_dir(), self.ctx.marker_suffixes()).await;
        let fallbacks = self.ctx.fallback_count();

        QuiescenceStatus {
            in_flight,
            markers,
            fallbacks,
        }
    }

    /// Check the predicate without waiting
    pub async fn is_quiescent(&self) -> bool {
        self.status().await.is_quiescent()
    }

    /// Poll until quiescent or shut down
    pub async fn wait(&mut self) -> WaitOutcome {
        debug!("Starting quiescence detection");
        let mut iteration_count: u32 = 0;
        let mut noticed_fallbacks = false;

        loop {
            let status = self.status().await;
            if status.is_quiescent() {
                info!("Run is quiescent after {} checks", iteration_count + 1);
                self.ctx.emit(RunEvent::Quiescent);
                return WaitOutcome::Quiescent;
            }

            if !noticed_fallbacks && status.in_flight == 0 && status.fallbacks > 0 {
                noticed_fallbacks = true;
                let outstanding = self.ctx.fallback_names();
                info!(
                    "Waiting for {} fallback transfers: {}",
                    outstanding.len(),
                    outstanding.join(", ")
                );
                self.ctx.emit(RunEvent::WaitingForFallbacks { outstanding });
            }

            iteration_count += 1;
            if iteration_count % run::DETECTOR_LOG_FREQUENCY == 0 {
                info!(
                    "Waiting for quiescence: {} (iteration {})",
                    status.summary(),
                    iteration_count
                );
            }

            let sleep = tokio::time::sleep(self.poll_interval);
            match self.shutdown_rx.as_mut() {
                Some(shutdown_rx) => {
                    tokio::select! {
                        _ = sleep => {}
                        _ = wait_for_shutdown_signal(shutdown_rx) => {
                            warn!("Shutdown requested while waiting: {}", status.summary());
                            return WaitOutcome::Cancelled;
                        }
                    }
                }
                None => sleep.await,
            }
        }
    }
}

/// Count files in `dir` whose name ends in one of `suffixes`
///
/// An unreadable directory counts as no markers.
pub async fn count_markers(dir: &Path, suffixes: &[String]) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot scan {} for partial transfers: {}", dir.display(), e);
            return 0;
        }
    };

    let mut count = 0;
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())) {
                    count += 1;
                }
            }
            Ok(None) => return count,
            Err(e) => {
                debug!("Stopped scanning {}: {}", dir.display(), e);
                return count;
            }
        }
    }
}
