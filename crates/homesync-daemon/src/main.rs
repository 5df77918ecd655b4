mod audio;
mod core;
mod http;
mod registry;
mod scheduler;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use homesync_proto::catalog::load_catalog;
use homesync_proto::config::Config;
use homesync_proto::timeline::now_ms;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging: stdout + append-only file
    let log_path = homesync_proto::platform::log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,homesync_daemon=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let catalog = load_catalog(&config.library)?;

    // Event channel: all external inputs funnel into SyncCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::SyncEvent>(256);

    let mut sync_core = core::SyncCore::new(Arc::new(catalog), event_tx.clone(), now_ms());
    if config.sync.autoplay {
        sync_core.autoplay(now_ms());
    }

    let shutdown = CancellationToken::new();
    let http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        http::HttpState::new(event_tx.clone(), config.sync.client_buffer),
        shutdown.clone(),
    );

    let ctrl_c_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = ctrl_c_tx.send(core::SyncEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    let intervals = core::Intervals {
        advance: config.sync.advance_interval(),
        heartbeat: config.sync.heartbeat_interval(),
    };
    info!("HomeSync daemon initialised, running event loop");
    sync_core.run(event_rx, intervals).await?;

    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(5), http_handle)
        .await
        .is_err()
    {
        warn!("HTTP server did not stop in time");
    }
    info!("HomeSync daemon stopped");

    Ok(())
}
