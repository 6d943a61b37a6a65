//! Model descriptors and the capability traits backends implement.
//!
//! A [`ModelDescriptor`] is static configuration: where the artifact lives,
//! how to feed it, and the performance figures reported to clients.  The
//! runtime side is a [`LoadedModel`], owned by the [`registry::ModelRegistry`],
//! whose [`ModelHandle`] is either a [`Classifier`] or a [`Detector`].

pub mod catalog;
pub mod preprocess;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::Image;
use crate::error::Result;

pub use catalog::{Catalog, CatalogError};
pub use preprocess::{ModelInput, Preprocess};
pub use registry::ModelRegistry;

/// Figures reported alongside every prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceInfo {
    #[serde(rename = "modelParameters")]
    pub parameters: String,
    pub flops: String,
    #[serde(rename = "numLayers")]
    pub num_layers: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSpec {
    /// `(width, height)` the network expects.
    pub input_size: (u32, u32),
    pub preprocess: Preprocess,
    /// Index → label.  Indices past the end get a synthetic label.
    pub labels: Vec<String>,
    /// Layers rendered as activation maps, shallow to deep.
    pub salient_layers: Vec<String>,
    /// Penultimate layer used as the OOD embedding.
    pub embedding_layer: Option<String>,
    /// Apply softmax to raw outputs; off for networks ending in a softmax.
    pub apply_softmax: bool,
}

impl ClassifierSpec {
    pub fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{index}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSpec {
    /// Minimum confidence for a detection to be reported.
    pub confidence: f32,
}

/// Closed set of model kinds.  The orchestrator switches on this tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelKind {
    Classifier(ClassifierSpec),
    Detector(DetectorSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KindTag {
    Classifier,
    Detector,
}

impl ModelKind {
    pub fn tag(&self) -> KindTag {
        match self {
            ModelKind::Classifier(_) => KindTag::Classifier,
            ModelKind::Detector(_) => KindTag::Detector,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub performance: PerformanceInfo,
    pub kind: ModelKind,
}

/// Spatial activations of one layer, stored HWC.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

/// Axis-aligned box in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// An image classifier.
///
/// All three calls take the already preprocessed network input.
pub trait Classifier: Send + Sync {
    /// Class scores for `input`, one per class.
    fn predict(&self, input: &ModelInput) -> Result<Vec<f32>>;

    /// Flattened output of `layer`, used as an embedding.
    fn embed(&self, input: &ModelInput, layer: &str) -> Result<Vec<f32>>;

    /// Spatial activations of `layer`.
    fn feature_map(&self, input: &ModelInput, layer: &str) -> Result<FeatureMap>;
}

/// An object detector working directly on the decoded image.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &Image, confidence: f32) -> Result<Vec<Detection>>;
}

#[derive(Clone)]
pub enum ModelHandle {
    Classifier(Arc<dyn Classifier>),
    Detector(Arc<dyn Detector>),
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelHandle::Classifier(_) => f.write_str("ModelHandle::Classifier"),
            ModelHandle::Detector(_) => f.write_str("ModelHandle::Detector"),
        }
    }
}

/// Runtime handle for a catalog entry.  Lives for the whole process.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub descriptor: Arc<ModelDescriptor>,
    pub handle: ModelHandle,
}

/// Turns a descriptor into a runnable model.  Implemented per backend.
pub trait ModelLoader: Send + Sync {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle>;
}
