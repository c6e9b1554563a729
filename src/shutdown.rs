use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal arrives.
/// The gateway, reactor and dashboard all stop when it fires; jobs still in
/// flight are abandoned since nothing is persisted.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down broker");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down broker");
            }
        }

        trigger.cancel();
    });

    Ok(token)
}
