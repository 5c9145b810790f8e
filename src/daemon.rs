//! Wires the table, reloader, activator and listener into the running daemon

use crate::activator::Activator;
use crate::config::Config;
use crate::control::QmControl;
use crate::error::Result;
use crate::listener::{bind_socket, Listener};
use crate::reload::{Reloader, TableSlot};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the daemon until the process is killed.
///
/// Only failing to bind the socket is fatal. A missing or unreadable
/// definitions directory leaves an empty table live until a later reload
/// succeeds.
pub async fn run(config: Config) -> Result<()> {
    if !nix::unistd::geteuid().is_root() && config.bind.port() < 1024 {
        warn!(port = config.bind.port(), "Not running as root, binding a privileged port may fail");
    }

    info!(
        config_dir = %config.config_dir.display(),
        qm_path = %config.qm_path.display(),
        cooldown_secs = config.cooldown.as_secs_f64(),
        "Starting wol-trigger"
    );

    let slot = Arc::new(TableSlot::default());
    let reloader = Arc::new(Reloader::new(&config.config_dir, Arc::clone(&slot)));
    reloader.reload_logged().await;

    let watcher = Arc::clone(&reloader);
    tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            error!(error = %e, "Reload triggers unavailable, MAC table will not refresh");
        }
    });

    let activator = Arc::new(Activator::with_cooldown(
        QmControl::new(&config.qm_path),
        config.cooldown,
    ));
    let socket = bind_socket(config.bind)?;
    Listener::new(socket, slot, activator).run().await
}
