//! Configuration structures for the run coordinator

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::queue::WorkQueueConfig;
use crate::app::worker::{default_worker_count, WorkerConfig};
use crate::constants::{run, session, sources};
use crate::errors::{RunError, RunResult};

/// Configuration for the run coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Directory transfers land in
    pub output_dir: PathBuf,
    /// File suffixes marking a transfer still in progress
    pub marker_suffixes: Vec<String>,
    /// Quiescence detector poll interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Fallback tasks allowed to hold a session at once
    pub max_fallback_sessions: usize,
    /// String stripped from primary-source file names after the run
    pub site_suffix: String,
    /// Run browsers without a window
    pub headless: bool,
    /// OS process name killed at teardown
    pub helper_process_name: String,
    /// Timeout for the reachability probe of a playlist link
    #[serde(with = "humantime_serde")]
    pub link_probe_timeout: Duration,
    /// Worker configuration
    pub worker: WorkerConfig,
    /// Queue configuration
    pub queue: WorkQueueConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            marker_suffixes: vec![run::TRANSFER_MARKER_SUFFIX.to_string()],
            poll_interval: run::QUIESCENCE_POLL_INTERVAL,
            max_fallback_sessions: default_worker_count(),
            site_suffix: sources::SITE_SUFFIX.to_string(),
            headless: true,
            helper_process_name: session::HELPER_PROCESS_NAME.to_string(),
            link_probe_timeout: run::LINK_PROBE_TIMEOUT,
            worker: WorkerConfig::default(),
            queue: WorkQueueConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the worker configuration
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    /// Set the quiescence poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Show or hide browser windows
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Bound the number of concurrent fallback sessions
    pub fn with_max_fallback_sessions(mut self, count: usize) -> Self {
        self.max_fallback_sessions = count;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> RunResult<()> {
        if self.poll_interval.is_zero() {
            return Err(RunError::InvalidConfig(
                "Quiescence poll interval cannot be zero".to_string(),
            ));
        }

        if self.max_fallback_sessions == 0 {
            return Err(RunError::InvalidConfig(
                "Fallback session limit cannot be zero".to_string(),
            ));
        }

        if self.marker_suffixes.iter().any(|suffix| suffix.is_empty()) {
            return Err(RunError::InvalidConfig(
                "Transfer marker suffixes cannot be empty".to_string(),
            ));
        }

        if self.helper_process_name.trim().is_empty() {
            return Err(RunError::InvalidConfig(
                "Helper process name cannot be empty".to_string(),
            ));
        }

        self.worker.validate()
    }
}
