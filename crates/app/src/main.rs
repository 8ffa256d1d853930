use std::sync::Arc;

use app::config::{normalize_sqlite_url, prepare_sqlite_file};
use app::{AppState, Config};
use clap::Parser;
use services::{AppServices, Clock};
use tracing_subscriber::EnvFilter;

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    let db_url = normalize_sqlite_url(config.db_url.clone());
    prepare_sqlite_file(&db_url)?;

    let catalog = Arc::new(config.load_catalog()?);
    let auth = config.authenticator();
    if auth.is_empty() {
        tracing::warn!("no session tokens configured; every progress request will be refused");
    }

    let services = AppServices::new_sqlite(&db_url, Clock::system(), catalog, Arc::new(auth)).await?;
    let app = app::router(Arc::new(AppState::new(&services)));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, db = %db_url, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        tracing::error!(%err, "server failed");
        std::process::exit(2);
    }
}
