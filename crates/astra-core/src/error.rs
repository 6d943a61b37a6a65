use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`CoreError`], used by the HTTP boundary to
/// pick a status code without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input; the caller can fix it.
    BadRequest,
    /// The requested model is not in the catalog.
    UnknownModel,
    /// The model is configured but cannot be used right now.
    ModelUnavailable,
    /// The image payload could not be decoded.
    InvalidImage,
    /// A model or explainer call failed at runtime.
    Runtime,
    /// Internal invariant broken (poisoned lock and the like).
    Internal,
}

#[derive(Debug, Error)]
/// All errors the core can return.
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Model '{name}' is not supported.")]
    UnknownModel { name: String },

    #[error("Model '{name}' is not available yet: {path}")]
    ModelMissing { name: String, path: PathBuf },

    #[error("Model '{name}' is unavailable: {message}")]
    ModelUnavailable { name: String, message: String },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("inference failed on '{model}': {message}")]
    Inference { model: String, message: String },

    #[error("explanation failed for layer '{layer}': {message}")]
    Explainability { layer: String, message: String },

    #[error("Lock poisoned while trying to {operation}")]
    LockPoisoned { operation: &'static str },
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::BadRequest(_) => ErrorKind::BadRequest,
            CoreError::UnknownModel { .. } => ErrorKind::UnknownModel,
            CoreError::ModelMissing { .. } | CoreError::ModelUnavailable { .. } => {
                ErrorKind::ModelUnavailable
            }
            CoreError::InvalidImage(_) => ErrorKind::InvalidImage,
            CoreError::Inference { .. } | CoreError::Explainability { .. } => ErrorKind::Runtime,
            CoreError::LockPoisoned { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn inference(model: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CoreError::Inference {
            model: model.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
