//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use astra_core::Orchestrator;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Owns the model registry, OOD gate and explainer.
    pub orchestrator: Arc<Orchestrator>,
}
