//! Test-only stub capabilities and image fixtures shared across the
//! pipeline test modules.

use crate::model::{FaceBox, FaceEmbedder, FaceLocalizer, ModelError};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;
use std::time::Duration;

/// Localizer stub returning the same boxes for every image.
pub struct StubLocalizer {
    boxes: Vec<FaceBox>,
    delay: Option<Duration>,
    fail: bool,
}

impl StubLocalizer {
    pub fn fixed(boxes: Vec<FaceBox>) -> Self {
        Self {
            boxes,
            delay: None,
            fail: false,
        }
    }

    pub fn none() -> Self {
        Self::fixed(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            boxes: Vec::new(),
            delay: None,
            fail: true,
        }
    }

    /// Sleep this long on every `detect` call, to widen cancellation
    /// windows in controller tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl FaceLocalizer for StubLocalizer {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<FaceBox>, ModelError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(ModelError::Inference("stub detector failure".into()));
        }
        Ok(self.boxes.clone())
    }
}

/// Embedder stub: the vector is the per-channel mean of the crop, so
/// identical crops embed identically and different content embeds
/// differently.
pub struct StubEmbedder;

impl FaceEmbedder for StubEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, ModelError> {
        let mut sums = [0.0f32; 3];
        for pixel in face.pixels() {
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum += f32::from(pixel[c]);
            }
        }
        let n = (face.width() * face.height()) as f32;
        Ok(sums.iter().map(|s| s / n).collect())
    }
}

/// Embedder stub that always fails.
pub struct FailingEmbedder;

impl FaceEmbedder for FailingEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }

    fn embed(&mut self, _face: &RgbImage) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::Inference("stub embedder failure".into()))
    }
}

pub fn face_box(top: f32, left: f32, width: f32, height: f32) -> FaceBox {
    FaceBox {
        top,
        left,
        width,
        height,
        confidence: 0.9,
    }
}

/// Image whose left half is `left_color` and right half `right_color`.
pub fn split_image(w: u32, h: u32, left_color: [u8; 3], right_color: [u8; 3]) -> DynamicImage {
    let img = RgbImage::from_fn(w, h, |x, _| {
        if x < w / 2 {
            Rgb(left_color)
        } else {
            Rgb(right_color)
        }
    });
    DynamicImage::ImageRgb8(img)
}

/// Write a split-tone PNG fixture to disk.
pub fn write_split_png(path: &Path, w: u32, h: u32, left_color: [u8; 3], right_color: [u8; 3]) {
    split_image(w, h, left_color, right_color)
        .save(path)
        .expect("write test image");
}

/// Write a solid-color PNG fixture to disk.
pub fn write_png(path: &Path, w: u32, h: u32, color: [u8; 3]) {
    write_split_png(path, w, h, color, color);
}
