use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use casabot_server::advisor::HttpAdvisor;
use casabot_server::config::load_config;
use casabot_server::{AppState, app, registry, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casabot_server=info,tower_http=info".into()),
        )
        .init();

    let config = load_config()?;
    tracing::info!("data directory: {}", config.server.data_dir.display());

    let db = storage::init_db(&config.server.data_dir)?;
    tracing::info!("database initialized");

    if let Some(path) = &config.catalog.listings_file {
        let count = db
            .import_listings(path)
            .with_context(|| format!("importing {}", path.display()))?;
        tracing::info!("imported {count} listing(s) from {}", path.display());
    }
    let catalog_size = db.list_listings()?.len();
    if catalog_size == 0 {
        tracing::warn!("listing catalog is empty; replies will carry no property cards");
    }

    let advisor = Arc::new(HttpAdvisor::new(&config.llm)?);
    let port = config.server.port;
    let base_url = config.server.base_url.clone();
    let sweep_every = config.session.sweep_interval();

    let state = AppState::new(db, config, advisor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(registry::run_sweeper(
        state.registry.clone(),
        sweep_every,
        shutdown_rx,
    ));

    let app = app(state);

    tracing::info!("starting server at {base_url}");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    Ok(())
}
