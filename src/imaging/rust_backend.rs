//! Pure Rust codec backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image::ImageReader` with format sniffing |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Alpha flattening | composite over white, per pixel |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder::new_with_quality` |
//!
//! Every encode produces baseline JPEG: it is the only format the `image`
//! crate encodes with a lossy quality knob.

use super::backend::{CompressionError, Dimensions, ImageBackend};
use super::params::EncodeParams;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageReader, RgbImage};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop alpha by compositing onto a white background.
fn flatten_to_rgb(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, CompressionError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CompressionError::Encode(format!("JPEG encode failed: {}", e)))?;
    Ok(buf)
}

impl ImageBackend for RustBackend {
    type Image = DynamicImage;

    fn decode(&self, raw: &[u8]) -> Result<DynamicImage, CompressionError> {
        ImageReader::new(Cursor::new(raw))
            .with_guessed_format()
            .map_err(|e| CompressionError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| CompressionError::Decode(e.to_string()))
    }

    fn dimensions(&self, image: &DynamicImage) -> Dimensions {
        let (width, height) = image.dimensions();
        Dimensions { width, height }
    }

    fn encode(
        &self,
        image: &DynamicImage,
        params: &EncodeParams,
    ) -> Result<Vec<u8>, CompressionError> {
        let quality = params.quality.value().min(100) as u8;
        match params.resize_to {
            Some((width, height)) => {
                let resized = image.resize_exact(width, height, FilterType::Lanczos3);
                encode_jpeg(&flatten_to_rgb(&resized), quality)
            }
            None => encode_jpeg(&flatten_to_rgb(image), quality),
        }
    }
}
