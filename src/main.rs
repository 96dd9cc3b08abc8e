//! Playlist Fetcher CLI application
//!
//! Command-line interface for downloading songs by name or from a playlist
//! page, serially or with one browser session per worker.

use std::process;

use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use playlist_fetcher::cli::{handle_playlist, handle_songs, Cli, Commands};
use playlist_fetcher::config::AppConfig;
use playlist_fetcher::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // .env is optional
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    let first_run = match cli.global.config {
        None => AppConfig::initialize_first_run().await.err(),
        Some(_) => None,
    };
    let config = AppConfig::load(cli.global.config.clone()).await?;
    init_logging(&cli, &config);

    info!("Playlist Fetcher v{} starting", env!("CARGO_PKG_VERSION"));
    if let Some(e) = first_run {
        warn!("Could not create default config file: {}", e);
    }

    match cli.command {
        Commands::Playlist(args) => {
            info!("Executing playlist command");
            handle_playlist(args, &cli.global, &config).await
        }
        Commands::Songs(args) => {
            info!("Executing songs command");
            handle_songs(args, &cli.global, &config).await
        }
    }
}

/// Initialize logging from CLI verbosity flags, else the configured level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let log_level = if cli.has_verbosity_flag() {
        cli.log_level().to_string().to_lowercase()
    } else {
        config.logging.level.to_lowercase()
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("playlist_fetcher={}", log_level).parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose) // Show levels only in very verbose mode
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
