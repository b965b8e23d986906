//! jsonhouse ingest server
//!
//! Accepts JSON documents over HTTP, evolves table schemas as new fields
//! appear and lowers every batch to column-store statements. Without a
//! column store attached, statements run against an in-process dry-run
//! catalog.

use anyhow::Context;
use jsonhouse_ingest::IngestProcessor;
use jsonhouse_registry::{spawn_refresh_loop, FileJsonStore, InMemoryTableRegistry, JsonStore, MemoryJsonStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod catalog;
mod config;
mod http;
mod logging;

use catalog::DryRunCatalog;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("JSONHOUSE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    config.apply_logging_env();
    logging::init();

    let manifests: Arc<dyn JsonStore> = match &config.storage.manifest_dir {
        Some(dir) => Arc::new(
            FileJsonStore::open(dir)
                .with_context(|| format!("opening manifest directory {}", dir.display()))?,
        ),
        None => {
            warn!("no manifest directory configured, virtual tables will not survive a restart");
            Arc::new(MemoryJsonStore::new())
        }
    };

    let catalog = Arc::new(DryRunCatalog::new(config.ingest.clone()));
    for statement in &config.registry.tables {
        catalog
            .load_statement(statement)
            .with_context(|| format!("invalid preloaded table: {}", statement))?;
    }

    let registry = Arc::new(InMemoryTableRegistry::new(catalog.clone(), Arc::clone(&manifests)));
    let shutdown = CancellationToken::new();
    let (refresh_task, reload) = spawn_refresh_loop(registry.clone(), config.registry.refresh(), shutdown.clone());

    info!(tables = ?catalog.table_names(), "dry-run catalog ready");

    let processor = Arc::new(IngestProcessor::new(
        config.ingest.clone(),
        registry,
        catalog.clone(),
        manifests,
    ));
    let app = http::router(http::AppState { processor, reload });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(addr = %addr, "jsonhouse server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    refresh_task.await.ok();
    info!(rows = catalog.inserted_rows(), "jsonhouse server stopped");
    Ok(())
}
