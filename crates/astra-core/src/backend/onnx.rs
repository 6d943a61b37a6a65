//! ONNX Runtime backend.
//!
//! Classifiers are exported NHWC with every salient layer and the embedding
//! layer exposed as extra graph outputs named after the layer; the class
//! scores are output 0.  Detectors are Ultralytics YOLO exports with a
//! `[1, 4 + classes, anchors]` output and a `names` metadata entry.

use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, warn};

use super::{NMS_IOU_THRESHOLD, non_max_suppression, parse_class_names};
use crate::codec::Image;
use crate::error::{CoreError, Result};
use crate::model::catalog::DSO_LABELS;
use crate::model::{
    BoundingBox, Classifier, Detection, Detector, FeatureMap, ModelDescriptor, ModelHandle,
    ModelInput, ModelKind, ModelLoader,
};

/// Square input edge of the YOLO exports.
const DETECTOR_INPUT: u32 = 640;

#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        let session = Session::builder()
            .map_err(|e| unavailable(descriptor, e))?
            .commit_from_file(&descriptor.path)
            .map_err(|e| unavailable(descriptor, e))?;

        Ok(match &descriptor.kind {
            ModelKind::Classifier(_) => ModelHandle::Classifier(Arc::new(OnnxClassifier {
                session: OnnxSession::new(&descriptor.name, session),
            })),
            ModelKind::Detector(_) => {
                let labels = class_names(&session);
                debug!(model = %descriptor.name, classes = labels.len(), "detector labels");
                ModelHandle::Detector(Arc::new(OnnxDetector {
                    session: OnnxSession::new(&descriptor.name, session),
                    labels,
                }))
            }
        })
    }
}

fn unavailable(descriptor: &ModelDescriptor, error: impl std::fmt::Display) -> CoreError {
    CoreError::ModelUnavailable {
        name: descriptor.name.clone(),
        message: error.to_string(),
    }
}

fn class_names(session: &Session) -> Vec<String> {
    if let Ok(metadata) = session.metadata()
        && let Ok(Some(raw)) = metadata.custom("names")
    {
        let names = parse_class_names(&raw);
        if !names.is_empty() {
            return names;
        }
    }
    warn!("model carries no class names, using the DSO labels");
    DSO_LABELS.iter().map(|l| (*l).to_owned()).collect()
}

/// A session plus the model name used in error messages.
struct OnnxSession {
    name: String,
    inner: Mutex<Session>,
}

/// Output tensor copied out of the session.
struct Output {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl OnnxSession {
    fn new(name: &str, session: Session) -> Self {
        Self {
            name: name.to_owned(),
            inner: Mutex::new(session),
        }
    }

    fn fail(&self, message: impl std::fmt::Display) -> CoreError {
        CoreError::inference(self.name.as_str(), message)
    }

    /// Run with one NHWC/NCHW input and copy out `output`, or output 0.
    fn run(&self, shape: [usize; 4], data: Vec<f32>, output: Option<&str>) -> Result<Output> {
        let tensor = Tensor::from_array((shape, data)).map_err(|e| self.fail(e))?;

        let mut session = self.inner.lock().map_err(|_| CoreError::LockPoisoned {
            operation: "lock onnx session",
        })?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| self.fail(e))?;

        let value = match output {
            Some(name) => outputs
                .get(name)
                .ok_or_else(|| self.fail(format!("model has no output named '{name}'")))?,
            None => &outputs[0],
        };
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| self.fail(e))?;

        Ok(Output {
            shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
            data: data.to_vec(),
        })
    }
}

struct OnnxClassifier {
    session: OnnxSession,
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: &ModelInput) -> Result<Vec<f32>> {
        Ok(self.session.run(input.shape(), input.data.clone(), None)?.data)
    }

    fn embed(&self, input: &ModelInput, layer: &str) -> Result<Vec<f32>> {
        Ok(self
            .session
            .run(input.shape(), input.data.clone(), Some(layer))?
            .data)
    }

    fn feature_map(&self, input: &ModelInput, layer: &str) -> Result<FeatureMap> {
        let out = self
            .session
            .run(input.shape(), input.data.clone(), Some(layer))
            .map_err(|e| CoreError::Explainability {
                layer: layer.to_owned(),
                message: e.to_string(),
            })?;
        let [_, height, width, channels] = out.shape[..] else {
            return Err(CoreError::Explainability {
                layer: layer.to_owned(),
                message: format!("expected a rank-4 NHWC output, got {:?}", out.shape),
            });
        };
        Ok(FeatureMap {
            height,
            width,
            channels,
            data: out.data,
        })
    }
}

struct OnnxDetector {
    session: OnnxSession,
    labels: Vec<String>,
}

impl OnnxDetector {
    fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{index}"))
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, image: &Image, confidence: f32) -> Result<Vec<Detection>> {
        let edge = DETECTOR_INPUT as usize;
        let resized = image.resized(DETECTOR_INPUT, DETECTOR_INPUT, FilterType::Triangle);

        let plane = edge * edge;
        let mut data = vec![0f32; 3 * plane];
        for (i, pixel) in resized.as_rgb().pixels().enumerate() {
            for (c, value) in pixel.0.iter().enumerate() {
                data[c * plane + i] = f32::from(*value) / 255.0;
            }
        }

        let out = self.session.run([1, 3, edge, edge], data, None)?;
        let [_, features, anchors] = out.shape[..] else {
            return Err(self
                .session
                .fail(format!("expected a rank-3 output, got {:?}", out.shape)));
        };
        if features <= 4 || out.data.len() != features * anchors {
            return Err(self
                .session
                .fail(format!("unexpected detector output shape {:?}", out.shape)));
        }

        let scale_x = image.width() as f32 / DETECTOR_INPUT as f32;
        let scale_y = image.height() as f32 / DETECTOR_INPUT as f32;
        let at = |row: usize, anchor: usize| out.data[row * anchors + anchor];

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let Some((class, score)) = (4..features)
                .map(|row| (row - 4, at(row, anchor)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if score < confidence {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            candidates.push(Detection {
                label: self.label(class),
                confidence: score,
                bbox: BoundingBox {
                    x1: (cx - w / 2.0) * scale_x,
                    y1: (cy - h / 2.0) * scale_y,
                    x2: (cx + w / 2.0) * scale_x,
                    y2: (cy + h / 2.0) * scale_y,
                },
            });
        }

        debug!(candidates = candidates.len(), "detector candidates before NMS");
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}
