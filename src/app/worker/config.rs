//! Worker configuration management
//!
//! Serial runs use one worker on the primary session. Parallel runs spawn
//! `worker_count` workers, each acquiring its own session on first use.

use serde::{Deserialize, Serialize};

use crate::constants::workers;
use crate::errors::{RunError, RunResult};

/// How items are spread over sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One worker, reusing the primary session
    #[default]
    Serial,
    /// `worker_count` workers, one dedicated session each
    Parallel,
}

/// Configuration for the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub mode: ExecutionMode,
    /// Workers spawned in parallel mode
    pub worker_count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Serial,
            worker_count: default_worker_count(),
        }
    }
}

/// One worker per logical processor
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, workers::MAX_WORKER_COUNT)
}

impl WorkerConfig {
    /// Workers the pool will actually spawn
    pub fn effective_workers(&self) -> usize {
        match self.mode {
            ExecutionMode::Serial => 1,
            ExecutionMode::Parallel => self.worker_count,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.mode == ExecutionMode::Parallel
    }

    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> RunResult<()> {
        if self.worker_count == 0 {
            return Err(RunError::InvalidConfig(
                "Worker count cannot be zero".to_string(),
            ));
        }

        if self.worker_count > workers::MAX_WORKER_COUNT {
            return Err(RunError::InvalidConfig(format!(
                "Worker count ({}) exceeds maximum ({})",
                self.worker_count,
                workers::MAX_WORKER_COUNT
            )));
        }

        Ok(())
    }
}

/// Builder for WorkerConfig
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch between serial and parallel mode
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config.mode = if enabled {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Serial
        };
        self
    }

    /// Set the number of parallel workers
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> RunResult<WorkerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation (for testing)
    pub fn build_unchecked(self) -> WorkerConfig {
        self.config
    }
}
