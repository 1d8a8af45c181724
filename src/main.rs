//! paydemo - payment network integration demo backend
//!
//! Serves step-by-step flow demonstrations, a small persistence API for the
//! demo UI, and proxies to the payment network.

mod api;
mod config;
mod db;
mod flow;
mod network;
mod runtime;

use api::{create_router, panic_response, AppState};
use config::AppConfig;
use db::Database;
use flow::FlowCatalog;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paydemo=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // The server still starts without a database; CRUD routes answer 503
    let db = open_database(&config.db_path);

    let catalog = Arc::new(FlowCatalog::builtin()?);
    tracing::info!(flows = catalog.flows().len(), "Flow catalog loaded");

    let gateway = network::gateway_from_config(config.network.as_ref());
    let api_base_url = config.network.as_ref().map(|n| n.base_url.clone());

    let state = AppState::new(db, gateway, catalog, api_base_url, config.history_limit);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("paydemo server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn open_database(path: &Path) -> Option<Database> {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(path = %parent.display(), error = %e, "Cannot create database directory");
            return None;
        }
    }

    tracing::info!(path = %path.display(), "Opening database");
    match Database::open(path) {
        Ok(db) => Some(db),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database; persistence disabled");
            None
        }
    }
}
