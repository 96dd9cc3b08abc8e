//! Command handlers for Playlist Fetcher CLI
//!
//! Each handler takes the loaded configuration, builds a coordinator backed by the
//! WebDriver factory, wires the progress display to its event channel, runs
//! it and prints the summary.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::session::{SystemProcesses, WebDriverFactory};
use crate::app::worker::WorkerConfigBuilder;
use crate::app::{session_output_dir, Coordinator, RunSummary};
use crate::cli::{GlobalArgs, PlaylistArgs, ProgressConfig, ProgressDisplay, RunArgs, SongsArgs};
use crate::config::AppConfig;
use crate::constants::run;
use crate::errors::{AppError, Result};

/// What a command asks the coordinator to fetch
enum Request {
    Playlist(String),
    Songs(Vec<String>),
}

/// Handle the playlist command
pub async fn handle_playlist(
    args: PlaylistArgs,
    global: &GlobalArgs,
    config: &AppConfig,
) -> Result<()> {
    info!("Fetching playlist {}", args.link);
    execute(Request::Playlist(args.link), &args.run, global, config).await
}

/// Handle the songs command
pub async fn handle_songs(args: SongsArgs, global: &GlobalArgs, config: &AppConfig) -> Result<()> {
    let names = args.collect_names().await?;
    info!("Fetching {} songs", names.len());
    execute(Request::Songs(names), &args.run, global, config).await
}

async fn execute(
    request: Request,
    run_args: &RunArgs,
    global: &GlobalArgs,
    config: &AppConfig,
) -> Result<()> {
    run_args.validate().map_err(AppError::generic)?;

    let output_dir = session_output_dir(run_args.output.as_deref(), Local::now());
    let mut coordinator_config = config.coordinator_config(output_dir);
    let worker = WorkerConfigBuilder::new()
        .parallel(run_args.is_parallel())
        .worker_count(
            run_args
                .workers
                .unwrap_or(coordinator_config.worker.worker_count),
        )
        .build()?;
    let headless = coordinator_config.headless && !run_args.show_browser;
    coordinator_config = coordinator_config
        .with_worker(worker)
        .with_headless(headless);

    let factory = Arc::new(WebDriverFactory::new(config.webdriver_config())?);
    let (events_tx, events_rx) = mpsc::channel(run::EVENT_CHANNEL_CAPACITY);
    let coordinator = Coordinator::new(
        coordinator_config,
        config.retrieval_config(),
        factory,
        Arc::new(SystemProcesses),
    )?
    .with_events(events_tx);

    let display = ProgressDisplay::new(ProgressConfig {
        enable_progress_bars: !global.quiet,
        ..Default::default()
    });
    let progress = tokio::spawn(display.consume(events_rx));

    let outcome = match request {
        Request::Playlist(link) => coordinator.run_playlist(&link).await,
        Request::Songs(names) => coordinator.run(names).await,
    };

    // the display stops once the last event sender is gone
    drop(coordinator);
    if let Err(e) = progress.await {
        warn!("Progress display task failed: {}", e);
    }

    let summary = outcome?;
    if !global.quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Run Summary:");
    println!("  Output folder: {}", summary.output_dir.display());
    println!("  Songs: {}", summary.total);
    println!(
        "  Downloaded: {} ({:.1}%)",
        summary.processed,
        summary.success_percentage()
    );
    println!("    from primary source: {}", summary.primary_transfers);
    println!(
        "    from fallback: {} of {} tried",
        summary.fallback_transfers, summary.fallback_dispatched
    );
    println!("  Missed: {}", summary.misses());
    println!("  Time: {:.1}s", summary.elapsed.as_secs_f64());

    if summary.cleanup.renamed > 0 {
        println!("  Files renamed: {}", summary.cleanup.renamed);
    }
    if summary.interrupted {
        println!("\n⚠️  Run interrupted before all songs were processed");
    }
    if !summary.abandoned.is_empty() {
        println!("\nNot attempted:");
        for name in &summary.abandoned {
            println!("  • {}", name);
        }
    }
}
