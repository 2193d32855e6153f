//! ArcFace face embedder via ONNX Runtime.
//!
//! Turns a normalized 112×112 face crop into an L2-normalized
//! 512-dimensional embedding, using the w600k_r50 ArcFace model.

use facesift_core::model::{FaceEmbedder, ModelError};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;

/// ArcFace-based embedding capability.
#[derive(Debug)]
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model and keep the session for the life of
    /// the process.
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(2)?))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Preprocess a 112×112 RGB crop into a NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (f32::from(pixel[c]) - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE)
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, ModelError> {
        if face.width() != ARCFACE_INPUT_SIZE || face.height() != ARCFACE_INPUT_SIZE {
            return Err(ModelError::Inference(format!(
                "expected a {ARCFACE_INPUT_SIZE}x{ARCFACE_INPUT_SIZE} crop, got {}x{}",
                face.width(),
                face.height()
            )));
        }

        let input = Self::preprocess(face);

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ModelError::Inference(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so cosine comparisons reduce to dot products.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(values)
    }
}
