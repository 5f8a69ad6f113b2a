//! Influence Engine - streaming coaching chat service
//!
//! A Rust backend that drives model-backed coaching conversations,
//! persists them, and mirrors them into a long-term memory service.

mod action;
mod api;
mod config;
mod db;
mod history;
mod memory;
mod runtime;
mod stream_decoder;
mod turn;

use action::{HttpActionClient, LoggingActionClient};
use api::{create_router, AppState};
use config::AppConfig;
use db::{Database, COACHING_INSTRUCTION_ID};
use memory::{NoopMemory, ZepMemory};
use runtime::{DatabaseStorage, MemoryStore, RuntimeManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
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
                .unwrap_or_else(|_| "influence_engine=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    if let Some(instruction) = &config.instruction {
        db.set_instruction(COACHING_INSTRUCTION_ID, instruction)?;
        tracing::info!("Coaching instruction seeded from environment");
    }

    // Model function server
    let actions = Arc::new(LoggingActionClient::new(Arc::new(HttpActionClient::new(
        &config.actions,
    )?)));
    tracing::info!(
        base_url = %config.actions.base_url,
        streaming = config.runtime.streaming,
        "Action client initialized"
    );

    // Long-term memory
    let memory: Arc<dyn MemoryStore> = match &config.memory {
        Some(zep) => {
            tracing::info!(base_url = %zep.base_url, "Memory service enabled");
            Arc::new(ZepMemory::new(zep)?)
        }
        None => {
            tracing::warn!("ZEP_API_KEY not set. Running without long-term memory.");
            Arc::new(NoopMemory)
        }
    };

    let manager = RuntimeManager::new(
        Arc::new(DatabaseStorage::new(db)),
        memory,
        actions,
        config.runtime.clone(),
    );
    let state = AppState::new(manager);

    // Create router
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
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Influence Engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
