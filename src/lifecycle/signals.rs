//! OS signal handling.
//!
//! SIGINT, SIGTERM and SIGHUP all map to a graceful shutdown of the session.

use tokio::signal::unix::{signal, SignalKind};

use crate::lifecycle::shutdown::{Shutdown, ShutdownReason};

/// Wait for the first termination signal and return its name.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    };
    Ok(name)
}

/// Translate termination signals into a shutdown trigger.
pub fn spawn_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            received = wait_for_signal() => match received {
                Ok(name) => {
                    shutdown.trigger(ShutdownReason::Signal(name));
                }
                Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
            },
            _ = shutdown.cancelled() => {}
        }
    })
}
