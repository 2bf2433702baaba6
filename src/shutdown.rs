use tokio::signal::unix::{signal, SignalKind};

/// Wait until the process receives SIGTERM or SIGINT.
///
/// The entrypoint awaits this and then calls [`crate::Cluster::shutdown`],
/// which stops the monitors and the TTL heartbeat; in-flight reconcile
/// passes run to completion.
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down");
        }
    }
    Ok(())
}
