//! boxsync: keep a directory in sync with a boxsync server
//!
//! Watches the root, reports local changes, pulls other clients' changes
//! and applies them until interrupted.

use boxsync::cli::SyncArgs;
use boxsync::transport::HttpTransport;
use boxsync::SyncClient;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = SyncArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match args.into_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[boxsync] {}", e);
            std::process::exit(2);
        }
    };

    tracing::info!("[boxsync] Syncing {} with {}", config.root.display(), config.server);
    match &config.notifier {
        Some(addr) => tracing::info!("[boxsync] Push notifications from {}", addr),
        None => tracing::info!(
            "[boxsync] No notifier configured, polling every {:?}",
            config.poll_interval()
        ),
    }

    let transport = match HttpTransport::new(
        config.server.clone(),
        config.session_key.clone(),
        config.request_timeout(),
    ) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("[boxsync] Cannot create HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let client = SyncClient::new(config, transport);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("[boxsync] Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("[boxsync] Received Ctrl+C, shutting down");
    };

    match client.run_until(shutdown).await {
        Ok(state) => tracing::info!(
            "[boxsync] Stopped with {} files tracked at action {}",
            state.len(),
            state.last_action_id
        ),
        Err(e) => {
            tracing::error!("[boxsync] {}", e);
            std::process::exit(1);
        }
    }
}
