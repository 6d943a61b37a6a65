//! Deterministic in-memory backends.
//!
//! Every stub counts its calls so tests can assert what the pipeline did
//! and, just as often, what it did not do.  Compiled for this crate's tests
//! and for dependents that enable the `stub` feature.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::codec::Image;
use crate::error::{CoreError, Result};
use crate::explain::Explainer;
use crate::gate::{OodGate, ReferenceGallery, SIMILARITY_THRESHOLD};
use crate::model::catalog::DSO_LABELS;
use crate::model::{
    BoundingBox, Catalog, Classifier, ClassifierSpec, Detection, Detector, DetectorSpec,
    FeatureMap, ModelDescriptor, ModelHandle, ModelInput, ModelKind, ModelLoader, ModelRegistry,
    PerformanceInfo, Preprocess,
};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};

/// Catalog entry whose artifact never exists.
pub const MISSING_MODEL: &str = "ghost";
pub const MISSING_PATH: &str = "/nonexistent/astra/ghost.onnx";

/// Embedding that matches the stub gallery exactly.
pub const IN_DISTRIBUTION_EMBEDDING: [f32; 3] = [1.0, 0.0, 0.0];
/// Embedding orthogonal to every stub gallery row.
pub const OUT_OF_DISTRIBUTION_EMBEDDING: [f32; 3] = [0.0, 0.0, 1.0];

/// A file that exists for as long as the crate sources do.
pub fn artifact_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")
}

/// `vgg` and `resnet` classifiers, two `yolo11` detector variants and a
/// classifier whose artifact is missing.  Inputs are 32×32 to keep tests fast.
pub fn catalog() -> Catalog {
    let classifier = |name: &str, layers: [&str; 2], path: PathBuf| ModelDescriptor {
        name: name.to_owned(),
        path,
        performance: PerformanceInfo {
            parameters: "1M".into(),
            flops: "1B".into(),
            num_layers: 8,
        },
        kind: ModelKind::Classifier(ClassifierSpec {
            input_size: (32, 32),
            preprocess: Preprocess::Caffe,
            labels: DSO_LABELS.iter().map(|l| (*l).to_owned()).collect(),
            salient_layers: layers.iter().map(|l| (*l).to_owned()).collect(),
            embedding_layer: Some("dense".into()),
            apply_softmax: false,
        }),
    };
    let detector = |name: &str| ModelDescriptor {
        name: name.to_owned(),
        path: artifact_path(),
        performance: PerformanceInfo {
            parameters: "5.2M".into(),
            flops: "6.1B".into(),
            num_layers: 149,
        },
        kind: ModelKind::Detector(DetectorSpec { confidence: 0.30 }),
    };

    let models = vec![
        classifier("vgg", ["block1_conv2", "block5_conv3"], artifact_path()),
        classifier("resnet", ["conv1_relu", "conv5_block3_out"], artifact_path()),
        classifier(MISSING_MODEL, ["a", "b"], PathBuf::from(MISSING_PATH)),
        detector("yolo11-deepspace"),
        detector("yolo11-balanced"),
    ];
    Catalog::new(models).unwrap_or_default()
}

/// Two orthogonal rows: `[1, 0, 0]` and `[0, 1, 0]`.
pub fn gallery() -> ReferenceGallery {
    ReferenceGallery::from_rows(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]])
        .unwrap_or_else(|_| unreachable!("stub gallery rows are rectangular"))
}

/// Orchestrator over the stub catalog and gallery with default settings.
pub fn orchestrator(loader: StubLoader, explainer: Arc<dyn Explainer>) -> Orchestrator {
    let registry = Arc::new(ModelRegistry::new(Arc::new(catalog()), Arc::new(loader)));
    let gate = Arc::new(OodGate::new(Some(Arc::new(gallery())), SIMILARITY_THRESHOLD));
    Orchestrator::new(registry, gate, explainer, OrchestratorConfig::default())
}

// ── Classifier ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct StubClassifier {
    scores: Vec<f32>,
    embedding: Vec<f32>,
    broken_layers: Vec<String>,
    failing: bool,
    predict_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

impl StubClassifier {
    /// Returns `scores` from every predict call and an in-distribution
    /// embedding.
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            scores,
            embedding: IN_DISTRIBUTION_EMBEDDING.to_vec(),
            broken_layers: Vec::new(),
            failing: false,
            predict_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_broken_layer(mut self, layer: &str) -> Self {
        self.broken_layers.push(layer.to_owned());
        self
    }

    /// Every predict call fails with [`CoreError::Inference`].
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StubClassifier {
    fn predict(&self, _input: &ModelInput) -> Result<Vec<f32>> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CoreError::Inference {
                model: "stub".into(),
                message: "simulated runtime failure".into(),
            });
        }
        Ok(self.scores.clone())
    }

    fn embed(&self, _input: &ModelInput, _layer: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.embedding.clone())
    }

    fn feature_map(&self, _input: &ModelInput, layer: &str) -> Result<FeatureMap> {
        if self.broken_layers.iter().any(|l| l == layer) {
            return Err(CoreError::Explainability {
                layer: layer.to_owned(),
                message: "layer not found".into(),
            });
        }
        let (height, width, channels) = (4, 4, 2);
        let data = (0..height * width * channels).map(|i| i as f32).collect();
        Ok(FeatureMap {
            height,
            width,
            channels,
            data,
        })
    }
}

// ── Detector ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct StubDetector {
    detections: Vec<Detection>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: AtomicUsize::new(0),
        }
    }

    /// One confident galaxy and one detection below the 0.30 threshold.
    pub fn fixture() -> Self {
        Self::new(vec![
            Detection {
                label: "galaxies".into(),
                confidence: 0.91,
                bbox: BoundingBox { x1: 4.0, y1: 6.0, x2: 20.0, y2: 18.0 },
            },
            Detection {
                label: "nebulae".into(),
                confidence: 0.12,
                bbox: BoundingBox { x1: 0.0, y1: 0.0, x2: 3.0, y2: 3.0 },
            },
        ])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for StubDetector {
    fn detect(&self, _image: &Image, _confidence: f32) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Hands out registered stubs by model name, or default ones.
#[derive(Debug, Default)]
pub struct StubLoader {
    classifiers: HashMap<String, Arc<StubClassifier>>,
    detectors: HashMap<String, Arc<StubDetector>>,
    delay: Option<Duration>,
    fail_next: AtomicBool,
    loads: AtomicUsize,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(mut self, name: &str, classifier: Arc<StubClassifier>) -> Self {
        self.classifiers.insert(name.to_owned(), classifier);
        self
    }

    pub fn with_detector(mut self, name: &str, detector: Arc<StubDetector>) -> Self {
        self.detectors.insert(name.to_owned(), detector);
        self
    }

    /// Sleep inside every load, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next load attempt fails with [`CoreError::ModelUnavailable`].
    pub fn failing_once(self) -> Self {
        self.fail_next.store(true, Ordering::SeqCst);
        self
    }

    /// Number of load attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::ModelUnavailable {
                name: descriptor.name.clone(),
                message: "simulated load failure".into(),
            });
        }

        Ok(match &descriptor.kind {
            ModelKind::Classifier(_) => {
                let classifier = self
                    .classifiers
                    .get(&descriptor.name)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(StubClassifier::new(vec![0.1, 0.6, 0.2, 0.1])));
                ModelHandle::Classifier(classifier)
            }
            ModelKind::Detector(_) => {
                let detector = self
                    .detectors
                    .get(&descriptor.name)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(StubDetector::fixture()));
                ModelHandle::Detector(detector)
            }
        })
    }
}

// ── Explainer ────────────────────────────────────────────────────────────────

/// Solid-colour heatmaps; fails for the configured layers.
#[derive(Debug, Default)]
pub struct StubExplainer {
    broken_layers: Vec<String>,
    calls: AtomicUsize,
}

impl StubExplainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broken_layer(mut self, layer: &str) -> Self {
        self.broken_layers.push(layer.to_owned());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Explainer for StubExplainer {
    fn explain(
        &self,
        _model: &dyn Classifier,
        input: &ModelInput,
        layer: &str,
        _target_class: usize,
    ) -> Result<Image> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_layers.iter().any(|l| l == layer) {
            return Err(CoreError::Explainability {
                layer: layer.to_owned(),
                message: "simulated explainer failure".into(),
            });
        }
        Ok(Image::from_rgb(image::RgbImage::from_pixel(
            input.width,
            input.height,
            image::Rgb([255, 0, 0]),
        )))
    }

    fn explain_detection(&self, image: &Image) -> Result<Image> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Image::from_rgb(image::RgbImage::from_pixel(
            image.width(),
            image.height(),
            image::Rgb([0, 0, 255]),
        )))
    }
}
