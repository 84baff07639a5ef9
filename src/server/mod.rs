//! HTTP facade over the job registry and the capture routine.

mod error;
mod handlers;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;

pub use error::ApiError;

use crate::capture::CaptureRoutine;
use crate::registry::JobRegistry;

/// Shared handler state.
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub routine: Arc<CaptureRoutine>,
}

/// API routes, plus the static UI from `public_dir` as the fallback.
pub fn router(state: Arc<AppState>, public_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/api/schedule", post(handlers::schedule))
        .route("/api/jobs", get(handlers::list_jobs))
        .route("/api/jobs/{job_id}", delete(handlers::cancel_job))
        .route("/api/screenshots", get(handlers::list_screenshots))
        .route("/api/screenshot/now", post(handlers::capture_now))
        .route("/api/screenshot/{filename}", get(handlers::screenshot))
        .route(
            "/api/screenshot/{filename}/download",
            get(handlers::download),
        )
        .with_state(state);

    let app = match public_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
