//! Capability seam for the external face models.
//!
//! The pipeline is handed one long-lived localizer and one long-lived
//! embedder at construction time; the process owns a single instance of
//! each for its whole lifetime.

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} — download from insightface and place in the models dir")]
    NotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Axis-aligned face box in source-image pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    /// Clamped `(top, right, bottom, left)` pixel bounds within an
    /// `image_width` × `image_height` image, or `None` when the clamped
    /// region is empty.
    pub fn pixel_bounds(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let top = self.top.clamp(0.0, image_height as f32) as u32;
        let left = self.left.clamp(0.0, image_width as f32) as u32;
        let right = (self.left + self.width).clamp(0.0, image_width as f32) as u32;
        let bottom = (self.top + self.height).clamp(0.0, image_height as f32) as u32;
        if right <= left || bottom <= top {
            return None;
        }
        Some((top, right, bottom, left))
    }
}

/// Face localization capability: raw image in, face boxes out.
///
/// May fail per image; the walker treats that as a recoverable skip, a
/// query treats it as fatal.
pub trait FaceLocalizer: Send {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<FaceBox>, ModelError>;
}

/// Embedding capability: normalized face crop in, fixed-length vector
/// out. Deterministic for identical input.
pub trait FaceEmbedder: Send {
    /// `(height, width)` crops must be normalized to before [`embed`](Self::embed).
    fn input_size(&self) -> (u32, u32);

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, ModelError>;
}
