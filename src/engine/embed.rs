//! Image to feature-vector extraction.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("Feature extractor failed: {0}")]
    Backend(String),
}

/// Turns a drawing into a fixed-length embedding.
///
/// Implementations must return vectors of one constant length.
pub trait FeatureExtractor: Send + Sync {
    fn embed(&self, image: &RgbaImage) -> Result<Vec<f32>, ExtractError>;
}

/// Deterministic extractor: flatten onto white, downscale to a square
/// thumbnail and store ink density (dark = 1.0) per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailEmbedder {
    side: u32,
}

impl ThumbnailEmbedder {
    pub const DEFAULT_SIDE: u32 = 32;

    pub fn new(side: u32) -> Self {
        Self { side: side.max(1) }
    }

    pub fn side(&self) -> u32 {
        self.side
    }
}

impl Default for ThumbnailEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIDE)
    }
}

impl FeatureExtractor for ThumbnailEmbedder {
    fn embed(&self, image: &RgbaImage) -> Result<Vec<f32>, ExtractError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractError::EmptyImage { width, height });
        }
        let gray = GrayImage::from_fn(width, height, |x, y| {
            let [r, g, b, a] = image.get_pixel(x, y).0;
            let luma = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
            let alpha = f32::from(a) / 255.0;
            let over_white = luma * alpha + 255.0 * (1.0 - alpha);
            Luma([over_white.round().clamp(0.0, 255.0) as u8])
        });
        let thumb = imageops::resize(&gray, self.side, self.side, FilterType::Triangle);
        Ok(thumb
            .pixels()
            .map(|Luma([value])| 1.0 - f32::from(*value) / 255.0)
            .collect())
    }
}
