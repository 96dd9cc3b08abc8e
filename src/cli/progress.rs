//! Live progress display for a run
//!
//! The coordinator reports through [`RunEvent`]s on an mpsc channel; this
//! module drains that channel into an indicatif bar. Every item ends in
//! exactly one of: transfer started, fallback failed, or faulted, so the bar
//! advances once per item. When stdout is not a terminal, or progress bars
//! are disabled, events are only tallied.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::debug;

use crate::app::{RunEvent, Source};

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable the visual progress bar
    pub enable_progress_bars: bool,
    /// Maximum width for song names in the bar message
    pub max_name_width: usize,
    /// Spinner tick interval
    pub tick_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            max_name_width: 40,
            tick_interval: Duration::from_millis(120),
        }
    }
}

/// Event counts seen by the display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTally {
    pub total: usize,
    pub primary: usize,
    pub fallback: usize,
    pub fallback_failed: usize,
    pub faulted: usize,
    pub quiescent: bool,
}

impl ProgressTally {
    /// Items that reached a final outcome
    pub fn finished(&self) -> usize {
        self.primary + self.fallback + self.fallback_failed + self.faulted
    }
}

/// Progress bar driven by run events
pub struct ProgressDisplay {
    config: ProgressConfig,
    bar: Option<ProgressBar>,
    tally: ProgressTally,
}

impl ProgressDisplay {
    /// Create a display; the bar is only drawn on a terminal
    pub fn new(config: ProgressConfig) -> Self {
        let is_terminal = atty::is(atty::Stream::Stdout);
        let bar = (config.enable_progress_bars && is_terminal).then(|| {
            let bar = ProgressBar::new_spinner();
            bar.enable_steady_tick(config.tick_interval);
            bar.set_message("Starting browser session...");
            bar
        });

        Self {
            config,
            bar,
            tally: ProgressTally::default(),
        }
    }

    /// Apply one event
    pub fn handle(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Started { total, workers } => {
                self.tally.total = *total;
                if let Some(bar) = &self.bar {
                    bar.set_style(bar_style());
                    bar.set_length(*total as u64);
                    bar.set_message(format!("{} worker(s)", workers));
                }
            }
            RunEvent::ItemStarted { name, .. } => {
                self.set_message(format!("Searching {}", self.truncate(name)));
            }
            RunEvent::TransferStarted { name, source } => {
                match source {
                    Source::Primary => self.tally.primary += 1,
                    Source::Fallback => self.tally.fallback += 1,
                }
                self.advance(format!("Downloading {}", self.truncate(name)));
            }
            RunEvent::FallbackDispatched { name } => {
                self.set_message(format!("Trying fallback for {}", self.truncate(name)));
            }
            RunEvent::FallbackFailed { name, reason } => {
                self.tally.fallback_failed += 1;
                debug!("No fallback for {}: {}", name, reason);
                self.advance(format!("Not found: {}", self.truncate(name)));
            }
            RunEvent::ItemFaulted { name, .. } => {
                self.tally.faulted += 1;
                self.advance(format!("Failed: {}", self.truncate(name)));
            }
            RunEvent::WorkerStopped { worker_id, reason } => {
                if let Some(reason) = reason {
                    self.println(format!("⚠️  Worker {} stopped: {}", worker_id, reason));
                }
            }
            RunEvent::WaitingForFallbacks { outstanding } => {
                self.set_message(format!(
                    "Waiting for {} fallback download(s)",
                    outstanding.len()
                ));
            }
            RunEvent::Quiescent => {
                self.tally.quiescent = true;
                self.set_message("Finishing downloads".to_string());
            }
        }
    }

    /// Drain `events` until every sender is dropped, then clear the bar
    pub async fn consume(mut self, mut events: mpsc::Receiver<RunEvent>) -> ProgressTally {
        while let Some(event) = events.recv().await {
            self.handle(&event);
        }
        self.finish();
        self.tally
    }

    /// Remove the bar from the terminal
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    pub fn tally(&self) -> ProgressTally {
        self.tally
    }

    fn advance(&self, message: String) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(message);
        }
    }

    fn set_message(&self, message: String) {
        if let Some(bar) = &self.bar {
            bar.set_message(message);
        }
    }

    fn println(&self, line: String) {
        if let Some(bar) = &self.bar {
            bar.println(line);
        }
    }

    fn truncate(&self, name: &str) -> String {
        let width = self.config.max_name_width;
        if name.chars().count() <= width {
            return name.to_string();
        }
        let head: String = name.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}
