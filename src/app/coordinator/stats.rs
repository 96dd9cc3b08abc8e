//! End-of-run statistics

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::CounterSnapshot;
use crate::app::cleanup::CleanupReport;
use crate::app::session::TeardownReport;
use crate::app::worker::PoolReport;

/// Final result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items seeded into the queue
    pub total: usize,
    /// Transfers started, on either source
    pub processed: usize,
    pub primary_transfers: usize,
    pub fallback_dispatched: usize,
    pub fallback_transfers: usize,
    pub fallback_failures: usize,
    /// Items whose primary leg errored or panicked
    pub faults: usize,
    /// Items never taken from the queue (all workers lost their sessions, or
    /// the run was interrupted)
    pub abandoned: Vec<String>,
    /// Whether the run was cut short by a shutdown signal
    pub interrupted: bool,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub pool: PoolReport,
    pub teardown: TeardownReport,
    pub cleanup: CleanupReport,
}

impl RunSummary {
    pub(crate) fn from_counters(total: usize, counters: CounterSnapshot, started_at: DateTime<Utc>) -> Self {
        Self {
            total,
            processed: counters.processed,
            primary_transfers: counters.primary_transfers,
            fallback_dispatched: counters.fallback_dispatched,
            fallback_transfers: counters.fallback_transfers,
            fallback_failures: counters.fallback_failures,
            faults: counters.faults,
            abandoned: Vec::new(),
            interrupted: false,
            output_dir: PathBuf::new(),
            started_at,
            elapsed: Duration::ZERO,
            pool: PoolReport::default(),
            teardown: TeardownReport::default(),
            cleanup: CleanupReport::default(),
        }
    }

    /// Items for which no transfer was started
    pub fn misses(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }

    /// Calculate the share of items transferred
    pub fn success_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64) * 100.0
    }

    /// Get a human-readable summary line
    pub fn summary(&self) -> String {
        format!(
            "{}/{} songs transferred ({:.1}%): {} primary, {} fallback, {} missed in {:.1}s",
            self.processed,
            self.total,
            self.success_percentage(),
            self.primary_transfers,
            self.fallback_transfers,
            self.misses(),
            self.elapsed.as_secs_f64()
        )
    }
}
