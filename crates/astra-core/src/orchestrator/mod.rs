//! Per-request inference pipeline.
//!
//! A predict call walks `Received → Fingerprinted → Gated | Passed →
//! Inferred → Explained → Responded`.  Any failure is terminal and is logged
//! with the stage it happened in.  Detectors skip the gate entirely.
//!
//! Every call here is blocking (decode, model runs, PNG encoding); async
//! callers should run it on a blocking thread.

pub mod outcome;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::codec::{self, Image};
use crate::error::{CoreError, Result};
use crate::explain::Explainer;
use crate::gate::OodGate;
use crate::model::preprocess;
use crate::model::{
    Classifier, ClassifierSpec, Detector, DetectorSpec, LoadedModel, ModelDescriptor, ModelHandle,
    ModelKind, ModelRegistry,
};

pub use outcome::{
    ClassPrediction, ClassificationResult, DetectionResult, OutOfDistribution, PredictionOutcome,
};

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Received,
    Fingerprinted,
    Gated,
    Passed,
    Inferred,
    Explained,
    Responded,
}

/// Inputs of one predict call, as received.
#[derive(Debug, Clone, Default)]
pub struct PredictRequest {
    /// `data:image/<fmt>;base64,...` or bare base64.
    pub image: Option<String>,
    pub model: Option<String>,
    /// Detector variant suffix; defaults to `deepspace`.
    pub dataset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Classifier whose embedding feeds the gate.
    pub reference_model: String,
    /// Length of `topPredictions`, capped by the class count.
    pub top_k: usize,
    /// Longest edge of upload previews.
    pub preview_max_edge: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reference_model: "vgg".to_owned(),
            top_k: 3,
            preview_max_edge: 1024,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    gate: Arc<OodGate>,
    explainer: Arc<dyn Explainer>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("gate", &self.gate)
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        gate: Arc<OodGate>,
        explainer: Arc<dyn Explainer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            explainer,
            config,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &OodGate {
        &self.gate
    }

    /// Accept a new upload: reset the similarity cache and return a
    /// `data:` URI preview bounded by `preview_max_edge`.
    pub fn upload(&self, bytes: &[u8]) -> Result<String> {
        self.gate.reset()?;
        let image = codec::decode_bytes(bytes)?;
        let preview = codec::encode_preview(&image, self.config.preview_max_edge)?;
        info!(
            width = image.width(),
            height = image.height(),
            "accepted upload"
        );
        Ok(codec::to_data_uri(&preview))
    }

    pub fn predict(&self, request: &PredictRequest) -> Result<PredictionOutcome> {
        let span = info_span!(
            "predict",
            model = request.model.as_deref().unwrap_or_default(),
            dataset = request.dataset.as_deref().unwrap_or_default(),
        );
        let _enter = span.enter();

        let mut stage = Stage::Received;
        let outcome = self.run(request, &mut stage);
        match &outcome {
            Ok(result) => {
                stage = Stage::Responded;
                debug!(%stage, in_distribution = result.in_distribution(), "prediction finished");
            }
            Err(e) => warn!(%stage, error = %e, "prediction failed"),
        }
        outcome
    }

    fn run(&self, request: &PredictRequest, stage: &mut Stage) -> Result<PredictionOutcome> {
        let (Some(payload), Some(model_name)) = (request.image.as_deref(), request.model.as_deref())
        else {
            return Err(CoreError::BadRequest("Missing image or model".into()));
        };
        if model_name.is_empty() {
            return Err(CoreError::BadRequest("Missing image or model".into()));
        }

        let descriptor = self
            .registry
            .catalog()
            .resolve(model_name, request.dataset.as_deref())
            .cloned()
            .ok_or_else(|| CoreError::UnknownModel {
                name: model_name.to_owned(),
            })?;

        let image = codec::decode(payload)?;
        advance(stage, Stage::Fingerprinted);

        let similarity = match &descriptor.kind {
            ModelKind::Classifier(_) => {
                let verdict = self.gate.check_in_distribution(
                    &image,
                    &self.registry,
                    &self.config.reference_model,
                )?;
                if !verdict.in_distribution {
                    advance(stage, Stage::Gated);
                    info!(score = verdict.score, "rejected as out of distribution");
                    return Ok(PredictionOutcome::Rejected(OutOfDistribution::new(
                        verdict.score,
                    )));
                }
                Some(verdict.score)
            }
            ModelKind::Detector(_) => None,
        };
        advance(stage, Stage::Passed);

        let model = self.registry.get(&descriptor.name)?;
        match (&descriptor.kind, &model.handle) {
            (ModelKind::Classifier(spec), ModelHandle::Classifier(classifier)) => self
                .classify(
                    model_name,
                    &model,
                    spec,
                    classifier.as_ref(),
                    &image,
                    similarity,
                    stage,
                )
                .map(PredictionOutcome::Classification),
            (ModelKind::Detector(spec), ModelHandle::Detector(detector)) => self
                .detect(model_name, &descriptor, spec, detector.as_ref(), &image, stage)
                .map(PredictionOutcome::Detection),
            _ => Err(CoreError::ModelUnavailable {
                name: descriptor.name.clone(),
                message: "backend returned a model of the wrong kind".into(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn classify(
        &self,
        requested: &str,
        model: &LoadedModel,
        spec: &ClassifierSpec,
        classifier: &dyn Classifier,
        image: &Image,
        similarity: Option<f32>,
        stage: &mut Stage,
    ) -> Result<ClassificationResult> {
        let name = &model.descriptor.name;
        let input = preprocess::prepare(image, spec.input_size, spec.preprocess);

        let started = Instant::now();
        let scores = classifier.predict(&input)?;
        let inference_time = started.elapsed().as_secs_f64() * 1000.0;

        if scores.is_empty() {
            return Err(CoreError::inference(name.as_str(), "model returned no class scores"));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(CoreError::inference(name.as_str(), "model returned non-finite scores"));
        }
        let probabilities = if spec.apply_softmax {
            softmax(&scores)
        } else {
            scores
        };

        let ranked = rank(&probabilities);
        let best = ranked[0];
        let top_predictions = ranked
            .iter()
            .take(self.config.top_k.min(probabilities.len()))
            .map(|&i| ClassPrediction {
                class: spec.label(i),
                probability: probabilities[i],
            })
            .collect();
        advance(stage, Stage::Inferred);
        info!(class = %spec.label(best), probability = probabilities[best], inference_ms = inference_time, "classified");

        let activation_map_urls = spec
            .salient_layers
            .iter()
            .map(|layer| self.render(layer, self.explainer.explain(classifier, &input, layer, best)))
            .collect();
        advance(stage, Stage::Explained);

        Ok(ClassificationResult {
            class: spec.label(best),
            probability: probabilities[best],
            inference_time,
            model_name: requested.to_owned(),
            input_size: image.size_label(),
            performance: model.descriptor.performance.clone(),
            top_predictions,
            activation_map_urls,
            similarity_score: similarity,
            in_distribution: true,
        })
    }

    fn detect(
        &self,
        requested: &str,
        descriptor: &ModelDescriptor,
        spec: &DetectorSpec,
        detector: &dyn Detector,
        image: &Image,
        stage: &mut Stage,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        let mut detections = detector.detect(image, spec.confidence)?;
        let inference_time = started.elapsed().as_secs_f64() * 1000.0;

        detections.retain(|d| d.confidence >= spec.confidence);
        if detections.is_empty() {
            info!(model = %descriptor.name, "no detections found");
        } else {
            info!(model = %descriptor.name, count = detections.len(), inference_ms = inference_time, "detected objects");
        }
        advance(stage, Stage::Inferred);

        let activation_map_urls = vec![self.render("detection", self.explainer.explain_detection(image))];
        advance(stage, Stage::Explained);

        Ok(DetectionResult {
            model_name: requested.to_owned(),
            input_size: image.size_label(),
            inference_time,
            detections,
            performance: descriptor.performance.clone(),
            activation_map_urls,
            similarity_score: None,
            in_distribution: true,
        })
    }

    /// Encode a heatmap as a data URI; any failure degrades to `""`.
    fn render(&self, layer: &str, heatmap: Result<Image>) -> String {
        match heatmap.and_then(|h| codec::encode(&h)) {
            Ok(encoded) => codec::to_data_uri(&encoded),
            Err(e) => {
                warn!(layer = %layer, error = %e, "activation map unavailable");
                String::new()
            }
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

/// Class indices ordered by descending score; ties keep index order.
fn rank(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests;
