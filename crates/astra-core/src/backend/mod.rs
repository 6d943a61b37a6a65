//! Inference backends.
//!
//! With the `onnx` feature enabled, [`OnnxLoader`] runs exported networks
//! through ONNX Runtime.  Without it the only loader is [`NoBackend`], which
//! keeps the service up but reports every model as unavailable.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxLoader;

use std::cmp::Ordering;

use crate::error::{CoreError, Result};
use crate::model::{Detection, ModelDescriptor, ModelHandle, ModelLoader};

/// IoU above which a lower-scoring box of the same class is suppressed.
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Loader for builds without an inference runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackend;

impl ModelLoader for NoBackend {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        Err(CoreError::ModelUnavailable {
            name: descriptor.name.clone(),
            message: "built without an inference backend".into(),
        })
    }
}

/// Greedy per-class non-maximum suppression.  Output is sorted by
/// descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.label == candidate.label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

/// Class names from an Ultralytics `names` metadata value such as
/// `{0: 'clusters', 1: 'galaxies'}`, in index order.
pub fn parse_class_names(raw: &str) -> Vec<String> {
    let mut names: Vec<(usize, String)> = raw
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|entry| {
            let (index, name) = entry.split_once(':')?;
            let index = index.trim().parse().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            (!name.is_empty()).then(|| (index, name.to_owned()))
        })
        .collect();
    names.sort_by_key(|(index, _)| *index);
    names.into_iter().map(|(_, name)| name).collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::model::{BoundingBox, DetectorSpec, ModelKind, PerformanceInfo};

    fn det(label: &str, confidence: f32, x1: f32) -> Detection {
        Detection {
            label: label.into(),
            confidence,
            bbox: BoundingBox { x1, y1: 0.0, x2: x1 + 10.0, y2: 10.0 },
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let kept = non_max_suppression(
            vec![
                det("galaxies", 0.6, 1.0),
                det("galaxies", 0.9, 0.0),
                det("galaxies", 0.5, 50.0),
                det("nebulae", 0.4, 0.0),
            ],
            NMS_IOU_THRESHOLD,
        );
        let summary: Vec<_> = kept.iter().map(|d| (d.label.as_str(), d.confidence)).collect();
        assert_eq!(summary, [("galaxies", 0.9), ("galaxies", 0.5), ("nebulae", 0.4)]);
    }

    #[test]
    fn parses_ultralytics_names() {
        assert_eq!(
            parse_class_names("{1: 'galaxies', 0: 'clusters', 2: \"nebulae\"}"),
            ["clusters", "galaxies", "nebulae"]
        );
        assert!(parse_class_names("{}").is_empty());
    }

    #[test]
    fn no_backend_reports_unavailable() {
        let descriptor = ModelDescriptor {
            name: "yolo11-deepspace".into(),
            path: PathBuf::from("yolo.onnx"),
            performance: PerformanceInfo {
                parameters: "5.2M".into(),
                flops: "6.1B".into(),
                num_layers: 149,
            },
            kind: ModelKind::Detector(DetectorSpec { confidence: 0.3 }),
        };
        let err = NoBackend.load(&descriptor).unwrap_err();
        assert!(matches!(err, CoreError::ModelUnavailable { .. }));
    }
}
