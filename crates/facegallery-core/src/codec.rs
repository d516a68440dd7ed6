//! Image codec: turns uploaded bytes into an RGB raster.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Decoded 8-bit RGB image.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pixels: RgbImage,
    format: Option<ImageFormat>,
}

/// Decode `bytes` into a raster, rejecting anything the `image` crate cannot read.
pub fn decode(bytes: &[u8]) -> Result<RasterImage, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::InvalidImage("empty input".into()));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| CodecError::InvalidImage(format!("unrecognized format: {e}")))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| CodecError::InvalidImage(e.to_string()))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(CodecError::InvalidImage("image has zero area".into()));
    }

    Ok(RasterImage {
        pixels: decoded.to_rgb8(),
        format: Some(format),
    })
}

impl RasterImage {
    /// Wrap an already-decoded RGB buffer.
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels, format: None }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Interleaved RGB bytes, row-major (`width * height * 3`).
    pub fn as_rgb(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// File extension matching the source encoding (`"bin"` if unknown).
    pub fn extension(&self) -> &'static str {
        self.format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin")
    }

    /// Copy out the region covered by `face`.
    pub fn crop(&self, face: &FaceBox) -> RasterImage {
        let view = imageops::crop_imm(&self.pixels, face.x, face.y, face.w, face.h);
        RasterImage::from_rgb(view.to_image())
    }

    /// Bilinear resize to exactly `width` × `height`.
    pub fn resize_exact(&self, width: u32, height: u32) -> RgbImage {
        imageops::resize(&self.pixels, width, height, FilterType::Triangle)
    }
}
