//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `/health` heartbeat and `/api-docs/openapi.json`
//! - `/api/upload`, `/api/predict` and `/api/models`
//! - body limit, gzip compression, CORS and per-request trace ids

mod api;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Router, middleware};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_size_bytes();

    Router::new()
        .merge(health::router())
        .merge(doc::router())
        .nest("/api", api::router())
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(CompressionLayer::new()),
        )
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(&state))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            trace::trace_middleware,
        ))
        .with_state(state)
}
