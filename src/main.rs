use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropshare::{
    api,
    blob_store::{BlobStore, LocalBlobStore},
    clock::SystemClock,
    config::Config,
    storage::Repository,
    transfers::TransferService,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "dropshare starting");

    // Load configuration
    let config = Config::load()?;
    info!(
        ttl_secs = config.lifecycle.ttl.as_secs(),
        sweep_interval_secs = config.lifecycle.sweep_interval.as_secs(),
        "Loaded configuration"
    );

    // Initialize blob storage
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.storage.storage_dir)?);
    info!(
        "Using blob storage at: {}",
        config.storage.storage_dir.display()
    );

    // Load transfer metadata
    let repository = Repository::open(&config.storage.metadata_file).await?;
    info!(
        transfers = repository.snapshot().len(),
        "Metadata loaded from: {}",
        config.storage.metadata_file.display()
    );

    let transfers = TransferService::new(
        repository,
        blobs,
        Arc::new(SystemClock),
        config.transfer_settings()?,
    );

    // Clear out whatever expired or was abandoned while we were down
    transfers.sweeper().sweep_once().await?;
    if let Err(e) = transfers.sweeper().reclaim_orphans().await {
        tracing::warn!(error = %e, "Failed to reclaim orphaned transfer directories");
    }

    let sweeper_handle = transfers
        .sweeper()
        .clone()
        .spawn(config.lifecycle.sweep_interval);

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        transfers,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: stop the periodic sweeper
    info!("Shutting down background tasks");
    sweeper_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
