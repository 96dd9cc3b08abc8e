//! Signal handling for interrupted runs
//!
//! A Ctrl-C or SIGTERM is broadcast to the coordinator, which stops waiting,
//! aborts outstanding work and tears down every session before returning.

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Signal handler for run interruption
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalHandler {
    /// Create a new signal handler with the given shutdown broadcaster
    pub fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    /// Setup signal handling (CTRL-C, SIGTERM)
    ///
    /// Returns a handle to the background task that monitors for signals.
    pub fn setup(&self) -> JoinHandle<()> {
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                match signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl+C signal received"),
                    Err(e) => {
                        warn!("Failed to install Ctrl+C handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("SIGTERM signal received");
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received Ctrl+C, tearing down sessions");
                },
                _ = terminate => {
                    info!("Received terminate signal, tearing down sessions");
                },
            }

            let _ = shutdown_tx.send(());
        })
    }
}

/// Create a shutdown signal broadcaster
pub fn create_shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(1)
}

/// Wait for a broadcast shutdown
///
/// A closed channel never resolves: with no sender left nobody can ask for a
/// shutdown.
pub async fn wait_for_shutdown_signal(shutdown_rx: &mut broadcast::Receiver<()>) {
    loop {
        match shutdown_rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
