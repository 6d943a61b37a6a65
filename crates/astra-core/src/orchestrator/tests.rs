use std::sync::Arc;

use image::{ImageEncoder, Rgb, RgbImage};
use tracing_test::traced_test;

use super::*;
use crate::explain::ActivationExplainer;
use crate::stub::{
    self, OUT_OF_DISTRIBUTION_EMBEDDING, StubClassifier, StubDetector, StubExplainer, StubLoader,
};

fn payload(seed: u8) -> String {
    let image = Image::from_rgb(RgbImage::from_fn(48, 40, |x, y| {
        Rgb([seed, (x * 5) as u8, (y * 6) as u8])
    }));
    codec::to_data_uri(&codec::encode(&image).unwrap())
}

fn request(model: &str, seed: u8) -> PredictRequest {
    PredictRequest {
        image: Some(payload(seed)),
        model: Some(model.to_owned()),
        dataset: None,
    }
}

fn classification(outcome: PredictionOutcome) -> ClassificationResult {
    match outcome {
        PredictionOutcome::Classification(result) => result,
        other => panic!("expected a classification, got {other:?}"),
    }
}

fn detection(outcome: PredictionOutcome) -> DetectionResult {
    match outcome {
        PredictionOutcome::Detection(result) => result,
        other => panic!("expected a detection, got {other:?}"),
    }
}

#[test]
fn classifies_in_distribution_image() {
    let resnet = Arc::new(StubClassifier::new(vec![0.05, 0.15, 0.7, 0.1]));
    let loader = StubLoader::new().with_classifier("resnet", Arc::clone(&resnet));
    let orchestrator = stub::orchestrator(loader, Arc::new(ActivationExplainer));

    let result = classification(orchestrator.predict(&request("resnet", 1)).unwrap());

    assert_eq!(result.class, "nebulae");
    assert!((result.probability - 0.7).abs() < 1e-6);
    assert_eq!(result.model_name, "resnet");
    assert_eq!(result.input_size, "48x40");
    assert!(result.inference_time >= 0.0);
    assert!(result.in_distribution);
    assert!((result.similarity_score.unwrap() - 1.0).abs() < 1e-6);

    let classes: Vec<_> = result.top_predictions.iter().map(|p| p.class.as_str()).collect();
    assert_eq!(classes, ["nebulae", "galaxies", "other"]);

    assert_eq!(result.activation_map_urls.len(), 2);
    assert!(
        result
            .activation_map_urls
            .iter()
            .all(|url| url.starts_with(codec::PNG_DATA_URI_PREFIX))
    );
    assert_eq!(resnet.predict_calls(), 1);
}

#[test]
fn repeated_image_reuses_cached_similarity() {
    let vgg = Arc::new(StubClassifier::new(vec![0.1, 0.6, 0.2, 0.1]));
    let loader = StubLoader::new().with_classifier("vgg", Arc::clone(&vgg));
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    let first = classification(orchestrator.predict(&request("vgg", 2)).unwrap());
    let second = classification(orchestrator.predict(&request("vgg", 2)).unwrap());

    assert_eq!(vgg.embed_calls(), 1);
    assert_eq!(vgg.predict_calls(), 2);
    assert_eq!(first.similarity_score, second.similarity_score);
    assert_eq!(orchestrator.gate().cache().len(), 1);
}

#[test]
fn upload_starts_a_fresh_similarity_session() {
    let vgg = Arc::new(StubClassifier::new(vec![0.1, 0.6, 0.2, 0.1]));
    let loader = StubLoader::new().with_classifier("vgg", Arc::clone(&vgg));
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    orchestrator.predict(&request("vgg", 3)).unwrap();
    let png = codec::encode_png(&Image::from_rgb(RgbImage::new(8, 8))).unwrap();
    orchestrator.upload(&png).unwrap();
    assert!(orchestrator.gate().cache().is_empty());

    orchestrator.predict(&request("vgg", 3)).unwrap();
    assert_eq!(vgg.embed_calls(), 2);
}

#[test]
#[traced_test]
fn out_of_distribution_image_skips_inference() {
    let vgg = Arc::new(
        StubClassifier::new(vec![0.1, 0.6, 0.2, 0.1])
            .with_embedding(OUT_OF_DISTRIBUTION_EMBEDDING.to_vec()),
    );
    let resnet = Arc::new(StubClassifier::new(vec![0.7, 0.1, 0.1, 0.1]));
    let explainer = Arc::new(StubExplainer::new());
    let loader = StubLoader::new()
        .with_classifier("vgg", Arc::clone(&vgg))
        .with_classifier("resnet", Arc::clone(&resnet));
    let orchestrator = stub::orchestrator(loader, explainer.clone());

    let outcome = orchestrator.predict(&request("resnet", 4)).unwrap();

    match &outcome {
        PredictionOutcome::Rejected(rejection) => {
            assert!(!rejection.in_distribution);
            assert!(rejection.similarity_score < orchestrator.gate().threshold());
            assert_eq!(rejection.message, super::outcome::OUT_OF_DISTRIBUTION_MESSAGE);
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(!outcome.in_distribution());
    assert_eq!(resnet.predict_calls(), 0);
    assert_eq!(vgg.predict_calls(), 0);
    assert_eq!(explainer.calls(), 0);
    assert!(!orchestrator.registry().is_loaded("resnet"));
    assert!(logs_contain("rejected as out of distribution"));
}

#[test]
fn top_predictions_are_capped_by_class_count() {
    let vgg = Arc::new(StubClassifier::new(vec![0.3, 0.7]));
    let loader = StubLoader::new().with_classifier("vgg", vgg);
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    let result = classification(orchestrator.predict(&request("vgg", 5)).unwrap());

    assert_eq!(result.top_predictions.len(), 2);
    assert_eq!(result.top_predictions[0].class, "galaxies");
    assert_eq!(result.top_predictions[1].class, "clusters");
}

#[test]
fn index_past_the_label_table_gets_a_synthetic_label() {
    let vgg = Arc::new(StubClassifier::new(vec![0.1, 0.1, 0.1, 0.1, 0.1, 0.5]));
    let loader = StubLoader::new().with_classifier("vgg", vgg);
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    let result = classification(orchestrator.predict(&request("vgg", 6)).unwrap());

    assert_eq!(result.class, "class_5");
    assert_eq!(result.top_predictions.len(), 3);
}

#[test]
fn unknown_model_fails_before_the_gate() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));

    let err = orchestrator.predict(&request("nonexistent", 7)).unwrap_err();

    assert!(matches!(err, CoreError::UnknownModel { ref name } if name == "nonexistent"));
    assert_eq!(err.to_string(), "Model 'nonexistent' is not supported.");
    assert!(orchestrator.gate().cache().is_empty());
    assert!(!orchestrator.registry().is_loaded("vgg"));
}

#[test]
fn missing_fields_are_a_bad_request() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));

    let no_model = PredictRequest {
        image: Some(payload(8)),
        ..Default::default()
    };
    let no_image = PredictRequest {
        model: Some("vgg".into()),
        ..Default::default()
    };
    let empty_model = PredictRequest {
        model: Some(String::new()),
        ..no_model.clone()
    };

    for request in [no_model, no_image, empty_model] {
        let err = orchestrator.predict(&request).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "Missing image or model");
    }
}

#[test]
fn garbage_payload_is_an_invalid_image() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));
    let request = PredictRequest {
        image: Some("data:image/png;base64,bm90IGFuIGltYWdl".into()),
        model: Some("vgg".into()),
        dataset: None,
    };
    assert!(matches!(
        orchestrator.predict(&request),
        Err(CoreError::InvalidImage(_))
    ));
}

#[test]
fn detector_bypasses_the_gate() {
    let vgg = Arc::new(StubClassifier::new(vec![0.25; 4]));
    let yolo = Arc::new(StubDetector::fixture());
    let loader = StubLoader::new()
        .with_classifier("vgg", Arc::clone(&vgg))
        .with_detector("yolo11-balanced", Arc::clone(&yolo));
    let orchestrator = stub::orchestrator(loader, Arc::new(ActivationExplainer));

    let request = PredictRequest {
        dataset: Some("balanced".into()),
        ..request("yolo11", 9)
    };
    let result = detection(orchestrator.predict(&request).unwrap());

    assert_eq!(result.model_name, "yolo11");
    assert_eq!(result.performance.num_layers, 149);
    assert_eq!(result.similarity_score, None);
    assert!(result.in_distribution);
    // The fixture's second detection is below the 0.30 threshold.
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].label, "galaxies");
    assert_eq!(result.activation_map_urls.len(), 1);

    assert_eq!(yolo.calls(), 1);
    assert_eq!(vgg.embed_calls(), 0);
    assert!(orchestrator.gate().cache().is_empty());
    assert!(!orchestrator.registry().is_loaded("vgg"));
}

#[test]
fn detector_defaults_to_deepspace_variant() {
    let yolo = Arc::new(StubDetector::new(vec![]));
    let loader = StubLoader::new().with_detector("yolo11-deepspace", Arc::clone(&yolo));
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    let result = detection(orchestrator.predict(&request("yolo11", 10)).unwrap());

    assert!(result.detections.is_empty());
    assert_eq!(yolo.calls(), 1);
    assert!(orchestrator.registry().is_loaded("yolo11-deepspace"));
}

#[test]
fn failed_activation_map_leaves_a_placeholder() {
    let explainer = Arc::new(StubExplainer::new().with_broken_layer("block1_conv2"));
    let orchestrator = stub::orchestrator(StubLoader::new(), explainer.clone());

    let result = classification(orchestrator.predict(&request("vgg", 11)).unwrap());

    assert_eq!(result.activation_map_urls.len(), 2);
    assert_eq!(result.activation_map_urls[0], "");
    assert!(result.activation_map_urls[1].starts_with(codec::PNG_DATA_URI_PREFIX));
    assert_eq!(explainer.calls(), 2);
}

#[test]
fn classifier_failure_propagates() {
    let resnet = Arc::new(StubClassifier::new(vec![0.5; 4]).failing());
    let loader = StubLoader::new().with_classifier("resnet", resnet);
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    let err = orchestrator.predict(&request("resnet", 12)).unwrap_err();

    assert!(matches!(err, CoreError::Inference { .. }));
    // The gate already ran, so its score stays cached.
    assert_eq!(orchestrator.gate().cache().len(), 1);
}

#[test]
fn non_finite_scores_are_rejected() {
    let vgg = Arc::new(StubClassifier::new(vec![0.5, f32::NAN, 0.1, 0.1]));
    let loader = StubLoader::new().with_classifier("vgg", vgg);
    let orchestrator = stub::orchestrator(loader, Arc::new(StubExplainer::new()));

    assert!(matches!(
        orchestrator.predict(&request("vgg", 13)),
        Err(CoreError::Inference { .. })
    ));
}

#[test]
fn missing_artifact_is_reported_after_the_gate() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));

    let err = orchestrator.predict(&request(stub::MISSING_MODEL, 14)).unwrap_err();

    assert!(matches!(err, CoreError::ModelMissing { .. }));
    assert_eq!(err.kind(), crate::error::ErrorKind::ModelUnavailable);
}

#[test]
fn upload_returns_a_bounded_preview() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));
    let large = Image::from_rgb(RgbImage::from_pixel(2000, 1500, Rgb([30, 60, 90])));
    let png = codec::encode_png(&large).unwrap();

    let preview = orchestrator.upload(&png).unwrap();

    assert!(preview.starts_with(codec::PNG_DATA_URI_PREFIX));
    assert_eq!(codec::decode(&preview).unwrap().dimensions(), (1024, 768));
}

#[test]
fn jpeg_upload_returns_a_bounded_preview() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));
    let photo = RgbImage::from_fn(2000, 1500, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 40]));
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
        .write_image(photo.as_raw(), 2000, 1500, image::ExtendedColorType::Rgb8)
        .unwrap();

    let preview = orchestrator.upload(&jpeg).unwrap();

    let (width, height) = codec::decode(&preview).unwrap().dimensions();
    assert_eq!((width, height), (1024, 768));
}

#[test]
fn upload_rejects_undecodable_bytes() {
    let orchestrator = stub::orchestrator(StubLoader::new(), Arc::new(StubExplainer::new()));
    assert!(matches!(
        orchestrator.upload(b"definitely not a png"),
        Err(CoreError::InvalidImage(_))
    ));
}

#[test]
fn rank_is_stable_on_ties() {
    assert_eq!(rank(&[0.2, 0.5, 0.2, 0.1]), vec![1, 0, 2, 3]);
}

#[test]
fn softmax_normalizes_logits() {
    let probs = softmax(&[1.0, 2.0, 3.0]);
    assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    assert!(probs[2] > probs[1] && probs[1] > probs[0]);
}
