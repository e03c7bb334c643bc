//! Background tasks: SIGHUP-triggered configuration reload.

use std::sync::Arc;

use tracing::info;

use sshping_core::state::ExporterState;

/// Reloads configuration on every SIGHUP until the process exits.
#[cfg(unix)]
pub(crate) async fn reload_on_sighup(state: Arc<ExporterState>) {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::{error, warn};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP, signal reload disabled");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        info!("received SIGHUP, reloading configuration");
        if let Err(e) = state.reload().await {
            error!(error = %e, trigger = "SIGHUP", "configuration reload failed");
        }
    }
}

#[cfg(not(unix))]
pub(crate) async fn reload_on_sighup(_state: Arc<ExporterState>) {
    info!("SIGHUP reload is not supported on this platform, use POST /-/reload");
}
