//! Command-line interface components
//!
//! This module contains CLI-specific code for the Playlist Fetcher
//! application: argument parsing, command handlers and progress display.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{Cli, Commands, GlobalArgs, PlaylistArgs, RunArgs, SongsArgs};
pub use commands::{handle_playlist, handle_songs};
pub use progress::{ProgressConfig, ProgressDisplay, ProgressTally};
