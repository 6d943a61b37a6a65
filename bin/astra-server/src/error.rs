//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body
//! `{"error": "..."}` with a status code picked from the error kind.
//!
//! Model runtime failures are surfaced verbatim; internal failures (poisoned
//! locks, panicked blocking tasks) are logged and answered generically.

use astra_core::{CoreError, ErrorKind};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from astra-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The caller sent an invalid or malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// The request body exceeded `ASTRA_MAX_UPLOAD_SIZE_MB`.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// A blocking task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Core(e) => match e.kind() {
                ErrorKind::BadRequest | ErrorKind::UnknownModel | ErrorKind::InvalidImage => {
                    StatusCode::BAD_REQUEST
                }
                ErrorKind::ModelUnavailable => StatusCode::NOT_FOUND,
                ErrorKind::Runtime | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match &self {
            ServerError::Core(e) if e.kind() == ErrorKind::Internal => {
                error!(error = %e, "internal error");
                "internal server error".to_owned()
            }
            ServerError::Join(e) => {
                error!(error = %e, "blocking task failed");
                "internal server error".to_owned()
            }
            other => {
                if status.is_server_error() {
                    warn!(error = %other, "request failed");
                }
                other.to_string()
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
