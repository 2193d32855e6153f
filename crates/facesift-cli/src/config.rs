use std::path::PathBuf;

/// CLI configuration, loaded from environment variables. Command-line
/// flags override individual fields.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine-distance ceiling for a positive match.
    pub match_threshold: f32,
    /// Minimum detector confidence for a face box to be considered.
    pub confidence_threshold: f32,
}

impl Config {
    /// Load configuration from `FACESIFT_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACESIFT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facesift_models::default_model_dir());

        Self {
            model_dir,
            match_threshold: env_f32(
                "FACESIFT_MATCH_THRESHOLD",
                facesift_core::matcher::DEFAULT_MATCH_THRESHOLD,
            ),
            confidence_threshold: env_f32("FACESIFT_CONFIDENCE_THRESHOLD", 0.5),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facesift_models::SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(facesift_models::ARCFACE_MODEL_FILE)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
