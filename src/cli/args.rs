//! Command-line argument parsing for Playlist Fetcher
//!
//! This module defines the CLI structure using clap derive macros: one
//! subcommand per input kind (a playlist link or a list of song names) and
//! shared run options.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::constants::workers;

/// Playlist Fetcher - Download songs by name or from a playlist
#[derive(Parser, Debug)]
#[command(
    name = "playlist_fetcher",
    version,
    about = "Download songs by name or from a playlist page",
    long_about = "Drives browser sessions against a song search site and falls back to a
video-to-audio converter for songs the site does not have. Songs are fetched
serially on one session or in parallel with one session per worker."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every song on a playlist page
    Playlist(PlaylistArgs),

    /// Download songs by name ("Artist - Title")
    Songs(SongsArgs),
}

/// Options shared by every run
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Base directory for the session folder (default: desktop, else home)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Run one browser session per worker instead of a single session
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of parallel workers (implies --parallel)
    #[arg(short = 'w', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Show browser windows
    #[arg(long)]
    pub show_browser: bool,
}

/// Arguments for the playlist command
#[derive(Args, Debug, Clone)]
pub struct PlaylistArgs {
    /// Link to the playlist page
    #[arg(value_name = "LINK")]
    pub link: String,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for the songs command
#[derive(Args, Debug, Clone)]
pub struct SongsArgs {
    /// Song names
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    /// Read additional names from a file, one per line
    #[arg(short, long, value_name = "FILE")]
    pub from_file: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }

    /// Whether any verbosity flag was given
    ///
    /// Without one, the level comes from the `[logging]` config section.
    pub fn has_verbosity_flag(&self) -> bool {
        self.global.quiet || self.global.verbose || self.global.very_verbose
    }
}

impl RunArgs {
    /// Check option combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if let Some(count) = self.workers {
            if count == 0 {
                return Err("Number of workers must be greater than 0".to_string());
            }
            if count > workers::MAX_WORKER_COUNT {
                return Err(format!(
                    "Number of workers cannot exceed {}",
                    workers::MAX_WORKER_COUNT
                ));
            }
        }
        Ok(())
    }

    /// Whether the run uses one session per worker
    pub fn is_parallel(&self) -> bool {
        self.parallel || self.workers.is_some()
    }
}

impl SongsArgs {
    /// Names given on the command line followed by those in `--from-file`
    ///
    /// Blank lines and lines starting with `#` in the file are skipped.
    pub async fn collect_names(&self) -> std::io::Result<Vec<String>> {
        let mut names = self.names.clone();
        if let Some(path) = &self.from_file {
            let content = tokio::fs::read_to_string(path).await?;
            names.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        Ok(names)
    }
}
