//! Image transport codec.
//!
//! Images travel over HTTP as base64 PNG (optionally wrapped in a
//! `data:image/<fmt>;base64,` URI) and live in memory as an 8-bit RGB
//! buffer.  Decoding accepts anything the `image` crate can read with the
//! enabled formats (PNG, JPEG); encoding always produces PNG so that
//! `decode(encode(img))` is lossless.

use base64::Engine as _;
use image::imageops::FilterType;
use image::{ImageEncoder, RgbImage};

use crate::error::{CoreError, Result};

/// Prefix used for every image returned to clients.
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// A decoded, owned RGB image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: RgbImage,
}

impl Image {
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// `"WxH"`, the format reported back as `input_size`.
    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width(), self.height())
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_rgb(self) -> RgbImage {
        self.pixels
    }

    /// Exact resize to `width`×`height`, ignoring aspect ratio.
    pub fn resized(&self, width: u32, height: u32, filter: FilterType) -> Image {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Image::from_rgb(image::imageops::resize(&self.pixels, width, height, filter))
    }
}

/// Decode a base64 payload, with or without a `data:` URI header.
pub fn decode(payload: &str) -> Result<Image> {
    let encoded = match payload.split_once(',') {
        Some((header, body)) if header.starts_with("data:") && header.ends_with(";base64") => body,
        Some((header, _)) if header.starts_with("data:") => {
            return Err(CoreError::InvalidImage(
                "data URI is not base64-encoded".into(),
            ));
        }
        Some(_) => {
            return Err(CoreError::InvalidImage(
                "expected a data URI or bare base64 payload".into(),
            ));
        }
        None => payload,
    };

    // MIME-style payloads wrap every 76 columns.
    let compact: Vec<u8> = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&compact)
        .map_err(|e| CoreError::InvalidImage(format!("base64 decode failed: {e}")))?;

    decode_bytes(&bytes)
}

/// Decode raw encoded image bytes (PNG, JPEG).
pub fn decode_bytes(bytes: &[u8]) -> Result<Image> {
    if bytes.is_empty() {
        return Err(CoreError::InvalidImage("empty image payload".into()));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| CoreError::InvalidImage(e.to_string()))?;
    Ok(Image::from_rgb(decoded.to_rgb8()))
}

/// Canonical PNG bytes for an image.  Also the input of the fingerprint.
pub fn encode_png(image: &Image) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let (width, height) = image.dimensions();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            image.as_rgb().as_raw(),
            width,
            height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| CoreError::InvalidImage(format!("png encode failed: {e}")))?;
    Ok(buf)
}

/// Full-resolution, lossless base64 PNG.
pub fn encode(image: &Image) -> Result<String> {
    let png = encode_png(image)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}

/// Downsized base64 PNG whose longest edge is at most `max_edge`.
///
/// Images already within bounds are never upscaled.  Resampling uses
/// Lanczos3 so previews stay faithful to the original.
pub fn encode_preview(image: &Image, max_edge: u32) -> Result<String> {
    let (width, height) = preview_dimensions(image.width(), image.height(), max_edge);
    let preview = image.resized(width, height, FilterType::Lanczos3);
    encode(&preview)
}

/// Wrap a base64 PNG in a `data:` URI.
pub fn to_data_uri(base64_png: &str) -> String {
    format!("{PNG_DATA_URI_PREFIX}{base64_png}")
}

/// Target dimensions for a preview bounded by `max_edge`, aspect preserved.
pub fn preview_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let max_edge = max_edge.max(1);
    let longest = width.max(height);
    if longest <= max_edge {
        return (width, height);
    }
    let scale = |side: u32| -> u32 {
        let scaled = (side as f64 * max_edge as f64 / longest as f64).round() as u32;
        scaled.clamp(1, max_edge)
    };
    (scale(width), scale(height))
}
