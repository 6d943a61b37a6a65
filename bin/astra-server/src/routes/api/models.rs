use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::schemas::api::ModelSummary;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_models), components(schemas(ModelSummary)))]
pub struct ModelsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

/// Catalog entries and whether each is loaded yet (`GET /api/models`).
#[utoipa::path(
    get,
    path = "/api/models",
    tag = "models",
    responses(
        (status = 200, description = "Model catalog", body = [ModelSummary])
    )
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelSummary>> {
    let registry = state.orchestrator.registry();
    let models = registry
        .catalog()
        .iter()
        .map(|descriptor| ModelSummary {
            name: descriptor.name.clone(),
            kind: descriptor.kind.tag().to_string(),
            loaded: registry.is_loaded(&descriptor.name),
            parameters: descriptor.performance.parameters.clone(),
            flops: descriptor.performance.flops.clone(),
            num_layers: descriptor.performance.num_layers,
        })
        .collect();
    Json(models)
}
