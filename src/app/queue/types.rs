//! Queue configuration and statistics types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for queue behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkQueueConfig {
    /// Time the queue lock is held between picking and removing an item
    ///
    /// Zero in normal operation; raised in tests to widen race windows.
    #[serde(with = "humantime_serde")]
    pub take_delay: Duration,
}

impl WorkQueueConfig {
    /// Configuration with a non-zero take delay
    pub fn with_take_delay(delay: Duration) -> Self {
        Self { take_delay: delay }
    }
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items loaded by `seed`
    pub seeded: usize,
    /// Items handed out by `try_take`
    pub taken: usize,
    /// Items still waiting
    pub remaining: usize,
}

impl QueueStats {
    /// Whether every seeded item has been handed out
    pub fn is_drained(&self) -> bool {
        self.remaining == 0
    }

    /// Fraction of seeded items handed out, as a percentage
    pub fn drained_percentage(&self) -> f64 {
        if self.seeded == 0 {
            return 100.0;
        }
        (self.taken as f64 / self.seeded as f64) * 100.0
    }
}
