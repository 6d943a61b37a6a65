//! Classification / detection endpoint.

use std::sync::Arc;

use astra_core::{PredictRequest, PredictionOutcome};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::api::PredictBody;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(predict))]
pub struct PredictApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/predict", post(predict))
}

/// Classify or detect objects in an image (`POST /api/predict`).
///
/// Classifiers first pass the out-of-distribution gate; an image that is not
/// similar enough to the reference gallery is answered with
/// `{message, similarityScore, in_distribution: false}` and no inference.
/// Detector families (`yolo11`, `yolo8`) select their variant with
/// `dataset` and skip the gate.
#[utoipa::path(
    post,
    path = "/api/predict",
    tag = "images",
    request_body = PredictBody,
    responses(
        (status = 200, description = "Classification, detection, or out-of-distribution rejection", body = serde_json::Value),
        (status = 400, description = "Missing fields, unknown model, or undecodable image"),
        (status = 404, description = "Model artifact or reference gallery unavailable"),
        (status = 500, description = "Inference failure"),
    )
)]
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictBody>, JsonRejection>,
) -> Result<Json<PredictionOutcome>, ServerError> {
    let Json(body) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    body.validate()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let request = PredictRequest::from(body);
    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = tokio::task::spawn_blocking(move || orchestrator.predict(&request)).await??;

    Ok(Json(outcome))
}
