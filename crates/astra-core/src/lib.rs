//! Deep-space-object image analysis: model registry, image codec,
//! out-of-distribution gate, explainability and the request orchestrator.

pub mod backend;
pub mod codec;
pub mod error;
pub mod explain;
pub mod gate;
pub mod model;
pub mod orchestrator;

#[cfg(any(test, feature = "stub"))]
pub mod stub;

pub use codec::Image;
pub use error::{CoreError, ErrorKind, Result};
pub use explain::{ActivationExplainer, Explainer};
pub use gate::{OodGate, ReferenceGallery, SIMILARITY_THRESHOLD};
pub use model::{Catalog, KindTag, ModelDescriptor, ModelLoader, ModelRegistry};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PredictRequest, PredictionOutcome};
