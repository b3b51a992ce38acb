// =============================================================================
// Sector Simulation Engine — Main Entry Point
// =============================================================================
//
// Boots the persistence store, the LLM adapter (live or fallback), the
// discussion engine, and the per-sector scheduler, resumes ticking for every
// sector already on disk, then serves the REST API until Ctrl+C.
// =============================================================================

mod api;
mod app_state;
mod checklist;
mod confidence;
mod config;
mod discussion_engine;
mod discussion_status;
mod domain;
mod errors;
mod llm_adapter;
mod manager_engine;
mod order_book;
mod persistence;
mod price_sim;
mod scheduler;
mod types;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("sector simulation engine starting up");

    let config = RuntimeConfig::from_env();
    info!(
        port = config.port,
        llm_enabled = config.llm_enabled,
        data_dir = %config.data_dir.display(),
        rounds_per_discussion = config.rounds_per_discussion,
        "runtime configuration loaded"
    );

    let state = AppState::new(config.clone())?;

    if let Err(err) = state.resume_all_sectors().await {
        error!(%err, "failed to resume persisted sectors");
    } else {
        info!("resumed scheduler loops for persisted sectors");
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(%err, "API server failed");
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(%err, "failed to listen for shutdown signal");
            }
            warn!("shutdown signal received — stopping gracefully");
        }
        _ = server => {
            warn!("API server task exited unexpectedly");
        }
    }

    info!("sector simulation engine shut down complete");
    Ok(())
}
