//! Static model descriptor table.
//!
//! The built-in table mirrors the deployed DSO models.  A TOML file with
//! one `[[model]]` table per entry can replace it at startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use super::{
    ClassifierSpec, DetectorSpec, ModelDescriptor, ModelKind, PerformanceInfo, Preprocess,
};

/// Labels shared by the four-class DSO classifiers.
pub const DSO_LABELS: [&str; 4] = ["clusters", "galaxies", "nebulae", "other"];

/// Dataset suffix used when a detector request omits one.
pub const DEFAULT_DATASET: &str = "deepspace";

const DEFAULT_INPUT_SIZE: [u32; 2] = [224, 224];
const DEFAULT_DETECTOR_CONFIDENCE: f32 = 0.30;

/// Largest classifier input edge a catalog entry may declare.
pub const MAX_INPUT_EDGE: u32 = 4096;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read model catalog {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("model '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("model '{name}' has an invalid confidence threshold {confidence}")]
    InvalidConfidence { name: String, confidence: f32 },

    #[error("model '{name}' has an invalid input size {width}x{height}")]
    InvalidInputSize { name: String, width: u32, height: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: Vec<Arc<ModelDescriptor>>,
}

impl Catalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.name.clone()) {
                return Err(CatalogError::DuplicateName(model.name.clone()));
            }
            if let ModelKind::Detector(spec) = &model.kind
                && !(0.0..=1.0).contains(&spec.confidence)
            {
                return Err(CatalogError::InvalidConfidence {
                    name: model.name.clone(),
                    confidence: spec.confidence,
                });
            }
            if let ModelKind::Classifier(spec) = &model.kind {
                let (width, height) = spec.input_size;
                let edge = 1..=MAX_INPUT_EDGE;
                if !edge.contains(&width) || !edge.contains(&height) {
                    return Err(CatalogError::InvalidInputSize {
                        name: model.name.clone(),
                        width,
                        height,
                    });
                }
            }
        }
        Ok(Self {
            models: models.into_iter().map(Arc::new).collect(),
        })
    }

    /// The deployed VGG16 / ResNet50 / EfficientNet classifiers and the
    /// YOLOv11 / YOLOv8 detector variants, with artifacts under `model_dir`.
    pub fn builtin(model_dir: &Path) -> Self {
        let mut models = vec![
            classifier(
                model_dir,
                "vgg",
                "vgg16-4c.onnx",
                perf("138M", "15.5B", 16),
                Preprocess::Caffe,
                &["block1_conv2", "block2_conv2", "block3_conv3", "block4_conv3", "block5_conv3"],
            ),
            classifier(
                model_dir,
                "resnet",
                "resnet50-4c.onnx",
                perf("23.5M", "4.1B", 50),
                Preprocess::Caffe,
                &[
                    "conv1_relu",
                    "conv2_block3_out",
                    "conv3_block4_out",
                    "conv4_block6_out",
                    "conv5_block3_out",
                ],
            ),
            classifier(
                model_dir,
                "efficientnet",
                "efficientnet-4c.onnx",
                perf("4M", "1.8B", 237),
                Preprocess::Raw,
                &["block2b_add", "block3b_add", "block5c_add", "block6d_add", "top_conv"],
            ),
        ];

        let detectors = [
            ("yolo11-deepspace", "yolo11-deepspace-50ep.onnx", perf("5.2M", "6.1B", 149)),
            ("yolo11-augmented", "yolo11-augmented-50ep.onnx", perf("5.2M", "6.1B", 149)),
            ("yolo11-balanced", "yolo11-balanced-50ep.onnx", perf("5.2M", "6.1B", 149)),
            ("yolo8-deepspace", "yolo8-deepspace-50ep.onnx", perf("4.5M", "1.5B", 171)),
            ("yolo8-augmented", "yolo8-augmented-50ep.onnx", perf("4.5M", "1.5B", 171)),
            ("yolo8-balanced", "yolo8-balanced-50ep.onnx", perf("4.5M", "1.5B", 171)),
        ];
        models.extend(detectors.into_iter().map(|(name, file, performance)| ModelDescriptor {
            name: name.to_owned(),
            path: model_dir.join(file),
            performance,
            kind: ModelKind::Detector(DetectorSpec {
                confidence: DEFAULT_DETECTOR_CONFIDENCE,
            }),
        }));

        Self {
            models: models.into_iter().map(Arc::new).collect(),
        }
    }

    /// Parse a TOML catalog; relative paths are resolved against `model_dir`.
    pub fn from_toml_str(source: &str, model_dir: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(source)?;
        let models = file
            .models
            .into_iter()
            .map(|entry| entry.into_descriptor(model_dir))
            .collect();
        Self::new(models)
    }

    pub fn from_file(path: &Path, model_dir: &Path) -> Result<Self, CatalogError> {
        let source = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source, model_dir)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelDescriptor>> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Look up `model`, falling back to the composite `<model>-<dataset>`
    /// key under which detector variants are registered.
    pub fn resolve(&self, model: &str, dataset: Option<&str>) -> Option<&Arc<ModelDescriptor>> {
        self.get(model).or_else(|| {
            let dataset = dataset.unwrap_or(DEFAULT_DATASET);
            self.get(&format!("{model}-{dataset}"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn classifier(
    model_dir: &Path,
    name: &str,
    file: &str,
    performance: PerformanceInfo,
    preprocess: Preprocess,
    salient_layers: &[&str],
) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_owned(),
        path: model_dir.join(file),
        performance,
        kind: ModelKind::Classifier(ClassifierSpec {
            input_size: (DEFAULT_INPUT_SIZE[0], DEFAULT_INPUT_SIZE[1]),
            preprocess,
            labels: default_labels(),
            salient_layers: salient_layers.iter().map(|l| (*l).to_owned()).collect(),
            embedding_layer: Some("dense".to_owned()),
            apply_softmax: false,
        }),
    }
}

fn perf(parameters: &str, flops: &str, num_layers: u32) -> PerformanceInfo {
    PerformanceInfo {
        parameters: parameters.to_owned(),
        flops: flops.to_owned(),
        num_layers,
    }
}

fn default_labels() -> Vec<String> {
    DSO_LABELS.iter().map(|l| (*l).to_owned()).collect()
}

fn default_input_size() -> [u32; 2] {
    DEFAULT_INPUT_SIZE
}

fn default_confidence() -> f32 {
    DEFAULT_DETECTOR_CONFIDENCE
}

// ── TOML schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "model", default)]
    models: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    path: PathBuf,
    parameters: String,
    flops: String,
    num_layers: u32,
    #[serde(flatten)]
    kind: EntryKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EntryKind {
    Classifier {
        #[serde(default = "default_input_size")]
        input_size: [u32; 2],
        preprocess: Preprocess,
        #[serde(default = "default_labels")]
        labels: Vec<String>,
        #[serde(default)]
        salient_layers: Vec<String>,
        #[serde(default)]
        embedding_layer: Option<String>,
        #[serde(default)]
        apply_softmax: bool,
    },
    Detector {
        #[serde(default = "default_confidence")]
        confidence: f32,
    },
}

impl CatalogEntry {
    fn into_descriptor(self, model_dir: &Path) -> ModelDescriptor {
        let path = if self.path.is_absolute() {
            self.path
        } else {
            model_dir.join(self.path)
        };
        let kind = match self.kind {
            EntryKind::Classifier {
                input_size,
                preprocess,
                labels,
                salient_layers,
                embedding_layer,
                apply_softmax,
            } => ModelKind::Classifier(ClassifierSpec {
                input_size: (input_size[0], input_size[1]),
                preprocess,
                labels,
                salient_layers,
                embedding_layer,
                apply_softmax,
            }),
            EntryKind::Detector { confidence } => ModelKind::Detector(DetectorSpec { confidence }),
        };
        ModelDescriptor {
            name: self.name,
            path,
            performance: perf(&self.parameters, &self.flops, self.num_layers),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KindTag;

    const SAMPLE: &str = r#"
        [[model]]
        name = "vgg"
        kind = "classifier"
        path = "vgg16-4c.onnx"
        parameters = "138M"
        flops = "15.5B"
        num_layers = 16
        preprocess = "caffe"
        salient_layers = ["block5_conv3"]
        embedding_layer = "dense"

        [[model]]
        name = "yolo11-deepspace"
        kind = "detector"
        path = "/abs/yolo11.onnx"
        parameters = "5.2M"
        flops = "6.1B"
        num_layers = 149
        confidence = 0.25
    "#;

    #[test]
    fn builtin_table_has_all_deployed_models() {
        let catalog = Catalog::builtin(Path::new("models"));
        assert_eq!(catalog.len(), 9);
        let vgg = catalog.get("vgg").unwrap();
        assert_eq!(vgg.performance.num_layers, 16);
        assert_eq!(vgg.path, Path::new("models").join("vgg16-4c.onnx"));
        match &vgg.kind {
            ModelKind::Classifier(spec) => {
                assert_eq!(spec.labels.len(), 4);
                assert_eq!(spec.salient_layers.len(), 5);
                assert_eq!(spec.embedding_layer.as_deref(), Some("dense"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(catalog.get("yolo8-balanced").unwrap().kind.tag(), KindTag::Detector);
    }

    #[test]
    fn resolve_uses_composite_detector_key() {
        let catalog = Catalog::builtin(Path::new("models"));
        assert_eq!(catalog.resolve("yolo11", Some("balanced")).unwrap().name, "yolo11-balanced");
        assert_eq!(catalog.resolve("yolo8", None).unwrap().name, "yolo8-deepspace");
        assert_eq!(catalog.resolve("resnet", Some("balanced")).unwrap().name, "resnet");
        assert!(catalog.resolve("nonexistent", None).is_none());
        assert!(catalog.resolve("yolo11", Some("unknown")).is_none());
    }

    #[test]
    fn parses_toml_catalog() {
        let catalog = Catalog::from_toml_str(SAMPLE, Path::new("/models")).unwrap();
        assert_eq!(catalog.len(), 2);

        let vgg = catalog.get("vgg").unwrap();
        assert_eq!(vgg.path, Path::new("/models/vgg16-4c.onnx"));
        match &vgg.kind {
            ModelKind::Classifier(spec) => {
                assert_eq!(spec.input_size, (224, 224));
                assert_eq!(spec.preprocess, Preprocess::Caffe);
                assert_eq!(spec.labels, default_labels());
                assert!(!spec.apply_softmax);
            }
            other => panic!("unexpected kind {other:?}"),
        }

        let yolo = catalog.get("yolo11-deepspace").unwrap();
        assert_eq!(yolo.path, Path::new("/abs/yolo11.onnx"));
        assert_eq!(yolo.kind, ModelKind::Detector(DetectorSpec { confidence: 0.25 }));
    }

    #[test]
    fn rejects_duplicate_names() {
        let doubled = format!("{SAMPLE}\n{}", &SAMPLE[SAMPLE.find("[[model]]").unwrap()..]);
        let err = Catalog::from_toml_str(&doubled, Path::new("/models")).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName(_)));
    }

    #[test]
    fn rejects_degenerate_input_sizes() {
        for size in ["[0, 0]", "[224, 0]", "[40000, 40000]"] {
            let entry = format!(
                r#"
                [[model]]
                name = "vgg"
                kind = "classifier"
                path = "vgg.onnx"
                parameters = "1M"
                flops = "1B"
                num_layers = 1
                preprocess = "raw"
                input_size = {size}
                "#
            );
            let err = Catalog::from_toml_str(&entry, Path::new("/")).unwrap_err();
            assert!(
                matches!(err, CatalogError::InvalidInputSize { ref name, .. } if name == "vgg"),
                "{size} accepted: {err:?}"
            );
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let bad = r#"
            [[model]]
            name = "x"
            kind = "segmenter"
            path = "x.onnx"
            parameters = "1M"
            flops = "1B"
            num_layers = 1
        "#;
        assert!(matches!(
            Catalog::from_toml_str(bad, Path::new("/")),
            Err(CatalogError::Parse(_))
        ));
    }
}
