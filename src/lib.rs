//! Playlist Fetcher Library
//!
//! Fetches a list of songs through browser automation: each song is searched
//! on a primary source and, when that misses, on a fallback source, with a
//! pool of workers draining a shared queue until the run goes quiet.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
