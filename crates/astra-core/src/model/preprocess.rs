use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::codec::Image;

/// ImageNet channel means in BGR order, as used by Caffe-style networks.
const CAFFE_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Per-family input normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Preprocess {
    /// RGB→BGR, then subtract the ImageNet mean.  VGG16, ResNet50.
    Caffe,
    /// Values left in 0–255.  EfficientNet does its own scaling.
    Raw,
    /// Scaled to 0–1.
    Unit,
}

/// Network input: a single NHWC `1×H×W×3` float tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ModelInput {
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }
}

/// Resize `image` to `size` and normalize it for `mode`.
pub fn prepare(image: &Image, size: (u32, u32), mode: Preprocess) -> ModelInput {
    let (width, height) = size;
    let resized = image.resized(width, height, FilterType::CatmullRom);

    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for pixel in resized.as_rgb().pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        match mode {
            Preprocess::Caffe => data.extend_from_slice(&[
                b - CAFFE_BGR_MEAN[0],
                g - CAFFE_BGR_MEAN[1],
                r - CAFFE_BGR_MEAN[2],
            ]),
            Preprocess::Raw => data.extend_from_slice(&[r, g, b]),
            Preprocess::Unit => data.extend_from_slice(&[r / 255.0, g / 255.0, b / 255.0]),
        }
    }

    ModelInput {
        width,
        height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(r: u8, g: u8, b: u8) -> Image {
        Image::from_rgb(RgbImage::from_pixel(10, 6, Rgb([r, g, b])))
    }

    #[test]
    fn output_has_requested_shape() {
        let input = prepare(&solid(1, 2, 3), (4, 4), Preprocess::Raw);
        assert_eq!(input.shape(), [1, 4, 4, 3]);
        assert_eq!(input.data.len(), 4 * 4 * 3);
        assert_eq!(&input.data[..3], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn caffe_swaps_channels_and_centers() {
        let input = prepare(&solid(123, 116, 103), (2, 2), Preprocess::Caffe);
        let first = &input.data[..3];
        assert!((first[0] - (103.0 - 103.939)).abs() < 1e-3);
        assert!((first[1] - (116.0 - 116.779)).abs() < 1e-3);
        assert!((first[2] - (123.0 - 123.68)).abs() < 1e-3);
    }

    #[test]
    fn unit_scales_to_one() {
        let input = prepare(&solid(255, 0, 51), (1, 1), Preprocess::Unit);
        assert_eq!(input.data, vec![1.0, 0.0, 0.2]);
    }
}
