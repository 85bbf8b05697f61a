//! Papershelf server entry point.
//!
//! Reads `.env` and the environment into an [`AppConfig`], opens the
//! database and library, and serves the API and the frontend until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use papershelf::{build_router, config::AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("papershelf=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let bind = config.bind;
    let state = Arc::new(AppState::new(config).context("failed to open library")?);

    tracing::info!(
        db = %state.config.db_path.display(),
        library = %state.config.library_dir.display(),
        frontend = %state.config.frontend_dir.display(),
        "Papershelf starting"
    );

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!("Listening on http://{}", bind);

    axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.shutdown().await.context("failed to flush on shutdown")?;
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
