//! Wire-shaped prediction results.
//!
//! Field names follow the JSON contract of `/api/predict`, so these types
//! serialize straight into the response body.

use serde::Serialize;

use crate::model::{Detection, PerformanceInfo};

pub const OUT_OF_DISTRIBUTION_MESSAGE: &str = "Image is not a recognized deep space object (DSO)";

/// Result of a predict call that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionOutcome {
    Rejected(OutOfDistribution),
    Classification(ClassificationResult),
    Detection(DetectionResult),
}

impl PredictionOutcome {
    pub fn in_distribution(&self) -> bool {
        !matches!(self, PredictionOutcome::Rejected(_))
    }
}

/// The gate short-circuited the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutOfDistribution {
    pub message: String,
    #[serde(rename = "similarityScore")]
    pub similarity_score: f32,
    pub in_distribution: bool,
}

impl OutOfDistribution {
    pub fn new(similarity_score: f32) -> Self {
        Self {
            message: OUT_OF_DISTRIBUTION_MESSAGE.to_owned(),
            similarity_score,
            in_distribution: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassPrediction {
    pub class: String,
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class: String,
    pub probability: f32,
    /// Forward-pass duration in milliseconds.
    pub inference_time: f64,
    pub model_name: String,
    pub input_size: String,
    #[serde(flatten)]
    pub performance: PerformanceInfo,
    #[serde(rename = "topPredictions")]
    pub top_predictions: Vec<ClassPrediction>,
    /// One data URI per salient layer; `""` where rendering failed.
    #[serde(rename = "activationMapUrls")]
    pub activation_map_urls: Vec<String>,
    #[serde(rename = "similarityScore")]
    pub similarity_score: Option<f32>,
    pub in_distribution: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub model_name: String,
    pub input_size: String,
    pub inference_time: f64,
    pub detections: Vec<Detection>,
    #[serde(flatten)]
    pub performance: PerformanceInfo,
    #[serde(rename = "activationMapUrls")]
    pub activation_map_urls: Vec<String>,
    #[serde(rename = "similarityScore", skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    pub in_distribution: bool,
}
