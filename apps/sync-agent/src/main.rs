use resonance_shared_config::SyncClientConfig;
use resonance_sync_client::{ClientEvent, Notification, SyncService, WsConnector};
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod player;

use player::HeadlessPlayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = SyncClientConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let token = config.require_token()?.to_string();

    tracing::info!(
        device_id = %config.device.device_id,
        device_name = %config.device.device_name,
        server = %config.server.ws_url,
        environment = %config.environment,
        "Starting Resonance sync agent"
    );

    let (service, handle) = SyncService::from_config(WsConnector, &config);
    let player = HeadlessPlayer::new(handle.local_changes());
    let events = handle.subscribe();

    let service_task = tokio::spawn(service.run(player));
    let log_task = tokio::spawn(log_events(events));

    handle.connect(token)?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    handle.shutdown()?;
    service_task.await?;
    log_task.abort();

    tracing::info!("Sync agent stopped");
    Ok(())
}

/// Build the log filter from the configured level
///
/// A bare level such as `debug` applies to the sync crates only; anything
/// with directives is used as written.
fn env_filter(log_level: &str) -> EnvFilter {
    let directives = if log_level.contains('=') || log_level.contains(',') {
        log_level.to_string()
    } else {
        format!("resonance_sync_agent={log_level},resonance_sync_client={log_level}")
    };
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {directives:?}: {e}; falling back to info");
        EnvFilter::new("resonance_sync_agent=info,resonance_sync_client=info")
    })
}

async fn log_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::ConnectionStateChanged(state)) => {
                tracing::info!(%state, "Connection state changed");
            }
            Ok(ClientEvent::Notification(Notification::Error { kind, message })) => {
                tracing::warn!(?kind, %message, "Sync server reported an error");
            }
            Ok(ClientEvent::Notification(notification)) => {
                tracing::info!(?notification, "Sync notification");
            }
            Ok(ClientEvent::DevicesChanged(devices)) => {
                let active = devices
                    .iter()
                    .find(|d| d.is_active)
                    .map(|d| d.device_name.as_str());
                tracing::info!(count = devices.len(), ?active, "Device list updated");
            }
            Ok(ClientEvent::SettingsChanged(settings)) => {
                tracing::debug!(?settings, "Settings synced");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
