use astra_core::PredictRequest;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Request body for `POST /api/predict`.
///
/// `image` and `model` are optional at the schema level so that a missing
/// field produces the service's own "Missing image or model" error instead
/// of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct PredictBody {
    /// `data:image/<fmt>;base64,...` or bare base64.
    pub image: Option<String>,
    /// Catalog name (`vgg`, `resnet`, `efficientnet`) or detector family
    /// (`yolo11`, `yolo8`).
    #[validate(length(max = 64, message = "model name is too long"))]
    pub model: Option<String>,
    /// Detector variant; `deepspace` when omitted.
    #[validate(length(min = 1, max = 64, message = "dataset must be 1-64 characters"))]
    pub dataset: Option<String>,
}

impl From<PredictBody> for PredictRequest {
    fn from(body: PredictBody) -> Self {
        PredictRequest {
            image: body.image,
            model: body.model,
            dataset: body.dataset,
        }
    }
}

/// Multipart form accepted by `POST /api/upload`.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// PNG or JPEG image.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Response of `POST /api/upload`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Downsized preview as a `data:image/png;base64,` URI.
    pub image: String,
}

/// One entry of `GET /api/models`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelSummary {
    pub name: String,
    /// `classifier` or `detector`.
    pub kind: String,
    /// Whether the model has been loaded into memory yet.
    pub loaded: bool,
    #[serde(rename = "modelParameters")]
    pub parameters: String,
    pub flops: String,
    #[serde(rename = "numLayers")]
    pub num_layers: u32,
}
