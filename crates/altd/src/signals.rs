//! Shutdown on operator signals.
//!
//! The daemon stops on SIGINT or SIGTERM (Ctrl+C on Windows). Background
//! tasks are aborted first so nothing queues new logins, then every alt the
//! runner supervises is disconnected.

use alt_runner::AltRunner;
use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolves with the first shutdown signal delivered to the process
#[cfg(unix)]
pub async fn next_signal() -> anyhow::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let received = tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
    };
    Ok(received)
}

#[cfg(not(unix))]
pub async fn next_signal() -> anyhow::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

/// Waits for `signal`, aborts `background` and stops every supervised alt
pub async fn shutdown_after<F>(
    signal: F,
    runner: &AltRunner,
    background: Vec<JoinHandle<()>>,
) -> anyhow::Result<ShutdownSignal>
where
    F: Future<Output = anyhow::Result<ShutdownSignal>>,
{
    let received = signal.await?;
    let stats = runner.get_stats();
    info!(
        "🛑 {} received, stopping {} alts ({} online, {} queued logins)",
        received, stats.tracked_alts, stats.live_connections, stats.login_queue
    );

    for handle in background {
        handle.abort();
    }
    runner.shutdown().await;
    Ok(received)
}
