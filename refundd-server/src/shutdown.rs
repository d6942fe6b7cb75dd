//! POSIX stop signals.

use tokio::signal::unix::{SignalKind, signal};

/// Wait until the process is asked to stop.
///
/// Resolves on the first SIGTERM or SIGINT. Handler installation only
/// fails without a runtime signal driver, so the panic is unreachable
/// under `#[tokio::main]`.
pub async fn wait_for_stop() {
    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");

    let caught = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    tracing::info!(signal = caught, "stop requested, draining");
}
