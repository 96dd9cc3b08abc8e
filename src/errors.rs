//! Error types for Playlist Fetcher
//!
//! Errors are grouped by the component that raises them. Per-item problems
//! ([`RetrievalError`]) never leave the worker that hit them; run-level
//! problems ([`RunError`]) abort before any worker starts.

use std::path::PathBuf;
use thiserror::Error;

/// Automation backend errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The WebDriver binary could not be started
    #[error("Failed to spawn driver '{binary}'")]
    DriverSpawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The driver process started but never became ready
    #[error("Driver did not become ready within {seconds} seconds")]
    DriverNotReady { seconds: u64 },

    /// HTTP transport error talking to the driver
    #[error("Driver HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// The backend went away mid-run
    #[error("Session disconnected: {reason}")]
    Disconnected { reason: String },

    /// The session was already closed
    #[error("Session already closed")]
    Closed,

    /// The backend rejected a command
    #[error("Driver command '{command}' failed: {error} ({message})")]
    Command {
        command: String,
        error: String,
        message: String,
    },

    /// No element matched a selector
    #[error("No element matches selector: {selector}")]
    NoSuchElement { selector: String },

    /// A bounded wait ran out
    #[error("Timed out after {seconds} seconds waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    /// The backend answered with something we could not interpret
    #[error("Invalid driver response: {reason}")]
    InvalidResponse { reason: String },

    /// Local I/O failure while managing the backend
    #[error("Session I/O error")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the owning session is unusable after this error
    ///
    /// A fatal error ends the worker that owns the session; any other error
    /// only affects the item being processed.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::DriverSpawn { .. }
            | SessionError::DriverNotReady { .. }
            | SessionError::Disconnected { .. }
            | SessionError::Closed => true,
            SessionError::Http(e) => e.is_connect(),
            SessionError::Command { error, .. } => {
                error == "invalid session id" || error == "session not created"
            }
            _ => false,
        }
    }

    /// Shorthand for a timeout on `what` lasting `timeout`
    pub fn timeout(what: impl Into<String>, timeout: std::time::Duration) -> Self {
        SessionError::Timeout {
            what: what.into(),
            seconds: timeout.as_secs(),
        }
    }
}

/// Per-item retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Backend failure while driving a source
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The fallback search produced no usable result
    #[error("Fallback search returned no results for '{item}'")]
    NoFallbackResults { item: String },

    /// The fallback result link carried no video identifier
    #[error("No video identifier in fallback link '{link}'")]
    MissingVideoId { link: String },

    /// The converter never showed its ready marker
    #[error("Fallback transfer for '{item}' not ready after {seconds} seconds")]
    FallbackTimeout { item: String, seconds: u64 },

    /// The converter showed no transfer link
    #[error("Fallback converter offered no transfer link for '{item}'")]
    NoTransferLink { item: String },

    /// A configured or derived URL was malformed
    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The retrieval state machine was asked for an illegal transition
    #[error("Invalid retrieval state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl RetrievalError {
    /// Whether the session that produced this error must be abandoned
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, RetrievalError::Session(e) if e.is_fatal())
    }
}

/// Work queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// `seed` may only be called once per queue
    #[error("Work queue already seeded with {count} items")]
    AlreadySeeded { count: usize },
}

/// Run-level errors that abort a run before workers start
#[derive(Error, Debug)]
pub enum RunError {
    /// The output directory could not be created or written
    #[error("Output directory not accessible: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A supplied source link could not be reached at all
    #[error("Link could not be reached: {link} ({reason})")]
    LinkUnreachable { link: String, reason: String },

    /// The playlist page yielded no item names
    #[error("No songs found at {link}")]
    EmptyPlaylist { link: String },

    /// Nothing to do
    #[error("No songs were supplied")]
    NoItems,

    /// The primary session could not be created
    #[error("Primary session could not be created")]
    PrimarySession(#[source] SessionError),

    /// A worker task could not be joined
    #[error("Worker {worker_id} terminated abnormally: {reason}")]
    WorkerJoin { worker_id: usize, reason: String },

    /// Run or worker settings are unusable
    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),

    /// An operation was attempted in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("Configuration could not be serialized")]
    Serialize(#[from] toml::ser::Error),

    /// I/O error reading or writing the config file
    #[error("Configuration file I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Automation backend error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Retrieval error
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Run-level error
    #[error(transparent)]
    Run(#[from] RunError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Session(_) => "session",
            AppError::Retrieval(_) => "retrieval",
            AppError::Queue(_) => "queue",
            AppError::Run(_) => "run",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Session result type alias
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Retrieval result type alias
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Queue result type alias
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Run result type alias
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Config result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
