//! Configuration management for Playlist Fetcher
//!
//! Configuration is read from a TOML file with one section per concern
//! (`[sources]`, `[session]`, `[run]`, `[logging]`). Every section has
//! defaults, so a partial file is valid. Durations are written as human
//! strings (`"30s"`, `"5m"`).
//!
//! Lookup order:
//! 1. The file passed with `--config`
//! 2. `./playlist-fetcher.toml`
//! 3. `<user config dir>/playlist-fetcher/config.toml`
//!
//! After loading, `PLAYLIST_FETCHER_DRIVER` (also read from `.env`) replaces
//! the WebDriver binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::retrieval::{RetrievalConfig, Selectors};
use crate::app::session::WebDriverConfig;
use crate::app::worker::default_worker_count;
use crate::app::{CoordinatorConfig, WorkQueueConfig, WorkerConfig};
use crate::constants::{config as paths, env, run, session, sources, workers};
use crate::errors::{AppError, ConfigError, ConfigResult, Result};

/// Duration as whole seconds, the way the template writes it
fn secs(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Log levels accepted in `[logging]`
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: SourcesConfigToml,
    pub session: SessionConfigToml,
    pub run: RunConfigToml,
    pub logging: LoggingConfig,
}

/// TOML-friendly source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfigToml {
    /// Primary search page
    pub primary_url: String,
    /// Text of the primary site's single "nothing found" entry
    pub not_found_text: String,
    /// Primary entries considered per search
    pub result_limit: usize,
    /// Fallback search page
    pub fallback_search_url: String,
    /// Fallback conversion endpoint
    pub fallback_transfer_endpoint: String,
    /// Stripped from file names after the run
    pub site_suffix: String,
    /// Page selectors
    pub selectors: Selectors,
}

impl Default for SourcesConfigToml {
    fn default() -> Self {
        Self {
            primary_url: sources::PRIMARY_URL.to_string(),
            not_found_text: sources::PRIMARY_NOT_FOUND_TEXT.to_string(),
            result_limit: sources::PRIMARY_RESULT_LIMIT,
            fallback_search_url: sources::FALLBACK_SEARCH_URL.to_string(),
            fallback_transfer_endpoint: sources::FALLBACK_TRANSFER_ENDPOINT.to_string(),
            site_suffix: sources::SITE_SUFFIX.to_string(),
            selectors: Selectors::default(),
        }
    }
}

/// TOML-friendly automation session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfigToml {
    /// WebDriver executable
    pub driver_binary: PathBuf,
    /// Browser executable handed to the driver
    pub browser_binary: Option<PathBuf>,
    /// Helper process name killed at teardown
    pub helper_process_name: String,
    /// Run browsers without a window
    pub headless: bool,
    #[serde(with = "humantime_serde")]
    pub page_load_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub element_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
}

impl Default for SessionConfigToml {
    fn default() -> Self {
        Self {
            driver_binary: PathBuf::from(session::DRIVER_BINARY),
            browser_binary: None,
            helper_process_name: session::HELPER_PROCESS_NAME.to_string(),
            headless: true,
            page_load_timeout: session::PAGE_LOAD_TIMEOUT,
            element_timeout: session::ELEMENT_TIMEOUT,
            startup_timeout: session::DRIVER_STARTUP_TIMEOUT,
        }
    }
}

/// TOML-friendly run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfigToml {
    /// Parallel worker count; the CPU count when unset
    pub worker_count: Option<usize>,
    /// Quiescence poll interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Bound for the fallback converter to get ready
    #[serde(with = "humantime_serde")]
    pub fallback_ready_timeout: Duration,
    /// Suffixes of partially transferred files
    pub marker_suffixes: Vec<String>,
    /// Fallback sessions open at once; the CPU count when unset
    pub max_fallback_sessions: Option<usize>,
    /// Timeout for the playlist link check
    #[serde(with = "humantime_serde")]
    pub link_probe_timeout: Duration,
}

impl Default for RunConfigToml {
    fn default() -> Self {
        Self {
            worker_count: None,
            poll_interval: run::QUIESCENCE_POLL_INTERVAL,
            fallback_ready_timeout: run::FALLBACK_READY_TIMEOUT,
            marker_suffixes: vec![run::TRANSFER_MARKER_SUFFIX.to_string()],
            max_fallback_sessions: None,
            link_probe_timeout: run::LINK_PROBE_TIMEOUT,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the first file found, then apply environment
    /// overrides
    ///
    /// An explicit path that does not exist is an error; missing default
    /// locations just mean defaults.
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => {
                debug!("No config file found; using defaults");
                Self::default()
            }
        };

        config.apply_driver_override(std::env::var(env::DRIVER_BINARY).ok());
        config.validate()?;
        Ok(config)
    }

    /// Create the user config file with commented defaults if none exists
    pub async fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ConfigError::Io)?;
        }
        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(ConfigError::Io)?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!("   You can customize settings by editing this file.");
        println!();

        Ok(Some(config_path))
    }

    /// Replace the driver binary with a non-empty override
    pub fn apply_driver_override(&mut self, driver: Option<String>) {
        if let Some(driver) = driver.filter(|d| !d.trim().is_empty()) {
            debug!("Driver binary overridden: {}", driver);
            self.session.driver_binary = PathBuf::from(driver.trim());
        }
    }

    /// Reject values the run cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |field: &str, value: String, reason: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            value,
            reason: reason.to_string(),
        };

        if self.sources.result_limit == 0 {
            return Err(invalid("sources.result_limit", "0".into(), "Must be at least 1"));
        }
        if self.run.poll_interval.is_zero() {
            return Err(invalid("run.poll_interval", "0s".into(), "Must be non-zero"));
        }
        if let Some(count) = self.run.worker_count {
            if count == 0 || count > workers::MAX_WORKER_COUNT {
                return Err(invalid(
                    "run.worker_count",
                    count.to_string(),
                    &format!("Must be between 1 and {}", workers::MAX_WORKER_COUNT),
                ));
            }
        }
        if self.run.max_fallback_sessions == Some(0) {
            return Err(invalid("run.max_fallback_sessions", "0".into(), "Must be at least 1"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(
                "logging.level",
                self.logging.level.clone(),
                "Expected one of error, warn, info, debug, trace",
            ));
        }
        Ok(())
    }

    /// Runtime retrieval configuration
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            primary_url: self.sources.primary_url.clone(),
            not_found_text: self.sources.not_found_text.clone(),
            result_limit: self.sources.result_limit,
            fallback_search_url: self.sources.fallback_search_url.clone(),
            fallback_transfer_endpoint: self.sources.fallback_transfer_endpoint.clone(),
            element_timeout: self.session.element_timeout,
            fallback_ready_timeout: self.run.fallback_ready_timeout,
            selectors: self.sources.selectors.clone(),
        }
    }

    /// Runtime WebDriver backend configuration
    pub fn webdriver_config(&self) -> WebDriverConfig {
        WebDriverConfig {
            driver_binary: self.session.driver_binary.clone(),
            browser_binary: self.session.browser_binary.clone(),
            startup_timeout: self.session.startup_timeout,
            page_load_timeout: self.session.page_load_timeout,
            ..WebDriverConfig::default()
        }
    }

    /// Runtime coordinator configuration writing into `output_dir`
    ///
    /// The worker mode is serial; callers switch it with
    /// [`CoordinatorConfig::with_worker`].
    pub fn coordinator_config(&self, output_dir: impl Into<PathBuf>) -> CoordinatorConfig {
        let worker = WorkerConfig {
            worker_count: self.run.worker_count.unwrap_or_else(default_worker_count),
            ..WorkerConfig::default()
        };

        CoordinatorConfig {
            output_dir: output_dir.into(),
            marker_suffixes: self.run.marker_suffixes.clone(),
            poll_interval: self.run.poll_interval,
            max_fallback_sessions: self
                .run
                .max_fallback_sessions
                .unwrap_or_else(default_worker_count),
            site_suffix: self.sources.site_suffix.clone(),
            headless: self.session.headless,
            helper_process_name: self.session.helper_process_name.clone(),
            link_probe_timeout: self.run.link_probe_timeout,
            worker,
            queue: WorkQueueConfig::default(),
        }
    }

    /// Write this configuration to `path` as TOML
    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from(".").join(paths::LOCAL_CONFIG_FILE);
        let search_paths = std::iter::once(local).chain(Self::default_config_path().ok());

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }
        None
    }

    fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;
        Ok(config_dir
            .join(paths::CONFIG_DIR_NAME)
            .join(paths::CONFIG_FILE_NAME))
    }

    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            warn!("Failed to read config file {}: {}", path.display(), e);
            ConfigError::Io(e)
        })?;
        let config: AppConfig = toml::from_str(&content)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Default configuration file with comments
    pub fn generate_default_config_content() -> String {
        format!(
            r##"# Playlist Fetcher Configuration
# This file was automatically generated on first run.
# Every setting is optional; removed keys fall back to these defaults.

[sources]
primary_url = "{primary_url}"
not_found_text = "{not_found}"
# Primary results considered per song
result_limit = {result_limit}
fallback_search_url = "{fallback_search}"
fallback_transfer_endpoint = "{fallback_endpoint}"
# Removed from downloaded file names once the run is done
site_suffix = "{site_suffix}"

# CSS selectors; override single keys when a site changes its markup
[sources.selectors]
# primary_query_input = "#query"

[session]
driver_binary = "{driver}"  # or set {driver_env}
# browser_binary = "/usr/bin/chromium"
helper_process_name = "{helper}"
headless = true
page_load_timeout = "{page_load}"
element_timeout = "{element}"
startup_timeout = "{startup}"

[run]
# worker_count = 8           # parallel workers, defaults to the CPU count
# max_fallback_sessions = 8  # defaults to the CPU count
poll_interval = "{poll}"
fallback_ready_timeout = "{ready}"
marker_suffixes = ["{marker}"]
link_probe_timeout = "{probe}"

[logging]
# Used when no -v/--very-verbose/-q flag is given
level = "warn"  # error, warn, info, debug, trace
"##,
            primary_url = sources::PRIMARY_URL,
            not_found = sources::PRIMARY_NOT_FOUND_TEXT,
            result_limit = sources::PRIMARY_RESULT_LIMIT,
            fallback_search = sources::FALLBACK_SEARCH_URL,
            fallback_endpoint = sources::FALLBACK_TRANSFER_ENDPOINT,
            site_suffix = sources::SITE_SUFFIX,
            driver = session::DRIVER_BINARY,
            driver_env = env::DRIVER_BINARY,
            helper = session::HELPER_PROCESS_NAME,
            page_load = secs(session::PAGE_LOAD_TIMEOUT),
            element = secs(session::ELEMENT_TIMEOUT),
            startup = secs(session::DRIVER_STARTUP_TIMEOUT),
            poll = secs(run::QUIESCENCE_POLL_INTERVAL),
            ready = secs(run::FALLBACK_READY_TIMEOUT),
            marker = run::TRANSFER_MARKER_SUFFIX,
            probe = secs(run::LINK_PROBE_TIMEOUT),
        )
    }
}
