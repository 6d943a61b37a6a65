//! Image upload: starts a new session and returns a preview.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::api::UploadResponse;
use crate::state::AppState;

const NO_FILE_SELECTED: &str = "No file selected";

#[derive(OpenApi)]
#[openapi(paths(upload_image))]
pub struct UploadApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/upload", post(upload_image))
}

/// Accept an image as multipart field `file` (`POST /api/upload`).
///
/// Every upload clears the similarity cache, so the first prediction on the
/// new image always recomputes its OOD score.  The response carries a PNG
/// preview whose longest edge is bounded by `ASTRA_PREVIEW_MAX_EDGE`.
#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "images",
    request_body(content = crate::schemas::api::UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Preview of the uploaded image", body = UploadResponse),
        (status = 400, description = "No file selected, or the file is not a decodable image"),
        (status = 413, description = "File exceeds the upload size limit"),
    )
)]
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut multipart =
        multipart.map_err(|_| ServerError::BadRequest(NO_FILE_SELECTED.to_owned()))?;
    let mut upload: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| read_error("Failed to read multipart field", e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if !field.file_name().is_some_and(|name| !name.is_empty()) {
            return Err(ServerError::BadRequest(NO_FILE_SELECTED.to_owned()));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| read_error("Failed to read file", e))?;
        upload = Some(bytes);
        break;
    }

    let bytes = upload
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ServerError::BadRequest(NO_FILE_SELECTED.to_owned()))?;
    debug!(size = bytes.len(), "received upload");

    let orchestrator = Arc::clone(&state.orchestrator);
    let image = tokio::task::spawn_blocking(move || orchestrator.upload(&bytes)).await??;

    Ok(Json(UploadResponse { image }))
}

/// Oversized bodies surface as a length-limit error while streaming.
fn read_error(context: &str, error: MultipartError) -> ServerError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(format!("{context}: upload exceeds the size limit"))
    } else {
        ServerError::BadRequest(format!("{context}: {error}"))
    }
}
