//! Health / heartbeat endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Always HTTP 200.  `gallery` is `false` when the reference embeddings
/// failed to load, in which case classifier predictions are unavailable.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    Json(json!({
        "status":  "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "models":  orchestrator.registry().catalog().len(),
        "gallery": orchestrator.gate().has_gallery(),
    }))
}
