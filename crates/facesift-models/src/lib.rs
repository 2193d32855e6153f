//! facesift-models — the concrete face model capabilities.
//!
//! SCRFD for face localization and ArcFace for face embeddings, both
//! running via ONNX Runtime on CPU. Each model is loaded once and kept
//! for the life of the process; the pipeline sees them only through the
//! capability traits in `facesift-core`.

pub mod embedder;
pub mod localizer;

pub use embedder::ArcFaceEmbedder;
pub use localizer::ScrfdLocalizer;

use std::path::PathBuf;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default directory for the ONNX model files:
/// `$XDG_DATA_HOME/facesift/models` (or `~/.local/share/facesift/models`).
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facesift")
        .join("models")
}
