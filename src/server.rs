//! Read-only monitoring surface.
//!
//! Thin wrapper over the two stores' aggregate counts; no protocol
//! logic lives here. External dashboards poll these endpoints to watch
//! the pending/validated/faulty totals converge.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppResult;
use crate::ledger::models::LedgerCounts;
use crate::ledger::store::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub origin: Arc<dyn LedgerStore>,
    pub mirror: Arc<dyn LedgerStore>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    Router::new()
        .route("/health", get(health_check))
        .route("/api/origin/counts", get(get_origin_counts))
        .route("/api/mirror/counts", get(get_mirror_counts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/origin/counts
async fn get_origin_counts(State(state): State<AppState>) -> AppResult<Json<LedgerCounts>> {
    Ok(Json(state.origin.counts().await?))
}

/// GET /api/mirror/counts
async fn get_mirror_counts(State(state): State<AppState>) -> AppResult<Json<LedgerCounts>> {
    Ok(Json(state.mirror.counts().await?))
}
