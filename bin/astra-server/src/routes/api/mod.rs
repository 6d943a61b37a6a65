//! Routes nested under `/api`.

pub mod models;
pub mod predict;
pub mod upload;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(upload::router())
        .merge(predict::router())
        .merge(models::router())
}

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut doc = upload::UploadApi::openapi();
    doc.merge(predict::PredictApi::openapi());
    doc.merge(models::ModelsApi::openapi());
    doc
}
