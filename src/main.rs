use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use backup_console_backend::config::Config;
use backup_console_backend::daemon::{run_event_loop, DaemonClient};
use backup_console_backend::store::{NoticeSeverity, SyncedStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().await;
    let client = match DaemonClient::new(&config) {
        Ok(client) => client,
        Err(err) => {
            error!(error = ?err, "Failed to construct daemon client");
            std::process::exit(1);
        }
    };
    let websocket_url = client.websocket_url();

    let store = SyncedStore::new(Arc::new(client), &config);
    store.start();

    let events = tokio::spawn(run_event_loop(store.clone(), websocket_url));

    let mut notices = store.subscribe_notices();
    let notice_log = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => match notice.severity {
                    NoticeSeverity::Error => {
                        warn!(message = %notice.message, "Daemon reported an error")
                    }
                    NoticeSeverity::Info => {
                        info!(message = %notice.message, "Daemon notification")
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = ?err, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
    store.stop();
    events.abort();
    notice_log.abort();
}
