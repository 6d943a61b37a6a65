//! Visual explanations for predictions.
//!
//! The orchestrator only depends on [`Explainer`]; how a heatmap is made is
//! up to the implementation.  [`ActivationExplainer`] renders the
//! channel-averaged activations of a layer with a jet colormap, which needs
//! nothing from a backend beyond [`Classifier::feature_map`].

use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::codec::Image;
use crate::error::{CoreError, Result};
use crate::model::{Classifier, FeatureMap, ModelInput};

pub trait Explainer: Send + Sync {
    /// Heatmap for `layer` of `model`, the same size as `input`.
    fn explain(
        &self,
        model: &dyn Classifier,
        input: &ModelInput,
        layer: &str,
        target_class: usize,
    ) -> Result<Image>;

    /// Coarse map for a detector input, the same size as `image`.
    fn explain_detection(&self, image: &Image) -> Result<Image>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationExplainer;

impl Explainer for ActivationExplainer {
    fn explain(
        &self,
        model: &dyn Classifier,
        input: &ModelInput,
        layer: &str,
        _target_class: usize,
    ) -> Result<Image> {
        let map = model.feature_map(input, layer)?;
        let heat = channel_mean(&map).map_err(|message| CoreError::Explainability {
            layer: layer.to_owned(),
            message,
        })?;
        let normalized = normalize(heat).ok_or_else(|| CoreError::Explainability {
            layer: layer.to_owned(),
            message: "activation map is empty after ReLU".into(),
        })?;

        let gray = to_gray(map.width as u32, map.height as u32, &normalized).ok_or_else(|| {
            CoreError::Explainability {
                layer: layer.to_owned(),
                message: "activation map has no pixels".into(),
            }
        })?;
        let resized = image::imageops::resize(&gray, input.width, input.height, FilterType::Triangle);
        Ok(colorize(&resized))
    }

    fn explain_detection(&self, image: &Image) -> Result<Image> {
        let luma = image::imageops::grayscale(image.as_rgb());
        let values: Vec<f32> = luma.pixels().map(|p| f32::from(p.0[0])).collect();
        let normalized = normalize(values).ok_or_else(|| CoreError::Explainability {
            layer: "detection".into(),
            message: "image is uniformly black".into(),
        })?;
        let gray = to_gray(image.width(), image.height(), &normalized).ok_or_else(|| {
            CoreError::Explainability {
                layer: "detection".into(),
                message: "image has no pixels".into(),
            }
        })?;
        Ok(colorize(&gray))
    }
}

/// Mean over channels with ReLU applied, one value per spatial position.
fn channel_mean(map: &FeatureMap) -> std::result::Result<Vec<f32>, String> {
    let expected = map.height * map.width * map.channels;
    if map.channels == 0 || map.data.len() != expected {
        return Err(format!(
            "feature map holds {} values, expected {}x{}x{}",
            map.data.len(),
            map.height,
            map.width,
            map.channels
        ));
    }
    Ok(map
        .data
        .chunks_exact(map.channels)
        .map(|c| (c.iter().sum::<f32>() / map.channels as f32).max(0.0))
        .collect())
}

/// Scale to `[0, 1]` by the maximum; `None` when nothing is positive.
fn normalize(mut values: Vec<f32>) -> Option<Vec<f32>> {
    let max = values.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 || !max.is_finite() {
        return None;
    }
    values.iter_mut().for_each(|v| *v = (*v / max).clamp(0.0, 1.0));
    Some(values)
}

fn to_gray(width: u32, height: u32, values: &[f32]) -> Option<GrayImage> {
    if width == 0 || height == 0 {
        return None;
    }
    let pixels = values.iter().map(|v| (v * 255.0).round() as u8).collect();
    GrayImage::from_raw(width, height, pixels)
}

fn colorize(gray: &GrayImage) -> Image {
    let (width, height) = gray.dimensions();
    Image::from_rgb(RgbImage::from_fn(width, height, |x, y| {
        let Luma([v]) = *gray.get_pixel(x, y);
        jet(v)
    }))
}

/// Jet colormap: dark blue → cyan → yellow → dark red.
pub fn jet(value: u8) -> Rgb<u8> {
    let v = f32::from(value) / 255.0;
    let channel = |offset: f32| {
        let c = 1.5 - (4.0 * v - offset).abs();
        (c.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubClassifier;

    fn input(width: u32, height: u32) -> ModelInput {
        ModelInput {
            width,
            height,
            data: vec![0.0; (width * height * 3) as usize],
        }
    }

    #[test]
    fn jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 128]));
        assert_eq!(jet(255), Rgb([128, 0, 0]));
        let mid = jet(128);
        assert!(mid.0[1] > 200, "middle of jet should be mostly green: {mid:?}");
    }

    #[test]
    fn heatmap_matches_input_size() {
        let classifier = StubClassifier::new(vec![0.2, 0.8]);
        let heat = ActivationExplainer
            .explain(&classifier, &input(32, 24), "block5_conv3", 1)
            .unwrap();
        assert_eq!(heat.dimensions(), (32, 24));
    }

    #[test]
    fn layer_failure_is_reported() {
        let classifier = StubClassifier::new(vec![1.0]).with_broken_layer("block1_conv2");
        let err = ActivationExplainer
            .explain(&classifier, &input(8, 8), "block1_conv2", 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::Explainability { .. }));
    }

    #[test]
    fn all_negative_activations_are_an_error() {
        let map = FeatureMap {
            height: 2,
            width: 2,
            channels: 1,
            data: vec![-1.0; 4],
        };
        assert!(normalize(channel_mean(&map).unwrap()).is_none());
    }

    #[test]
    fn malformed_feature_map_is_rejected() {
        let map = FeatureMap {
            height: 2,
            width: 2,
            channels: 3,
            data: vec![1.0; 5],
        };
        assert!(channel_mean(&map).is_err());
    }

    #[test]
    fn detection_map_matches_image_size() {
        let image = Image::from_rgb(RgbImage::from_fn(20, 10, |x, _| Rgb([x as u8 * 10, 0, 0])));
        let heat = ActivationExplainer.explain_detection(&image).unwrap();
        assert_eq!(heat.dimensions(), (20, 10));
    }

    #[test]
    fn black_image_has_no_detection_map() {
        let image = Image::from_rgb(RgbImage::new(4, 4));
        assert!(ActivationExplainer.explain_detection(&image).is_err());
    }
}
