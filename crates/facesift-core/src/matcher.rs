//! Similarity queries against a populated [`FaceStore`].

use crate::model::{FaceEmbedder, FaceLocalizer, ModelError};
use crate::normalize;
use crate::store::{FaceStore, MatchResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cosine-distance ceiling under which a stored face counts as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// A query the user explicitly issued must surface its failures, unlike
/// ingestion where a bad file is just skipped.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("cannot read query image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode query image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Localize and embed every face of the query image, then linearly scan
/// the store for embeddings within `threshold` cosine distance.
///
/// Query faces are not deduplicated — each one is compared
/// independently. Matches are reported in store iteration order across
/// all query faces; callers may re-sort by distance. Stored embeddings
/// with empty vectors are skipped, never fatal.
pub fn find_matches(
    query_path: &Path,
    store: &FaceStore,
    localizer: &mut dyn FaceLocalizer,
    embedder: &mut dyn FaceEmbedder,
    threshold: f32,
) -> Result<Vec<MatchResult>, QueryError> {
    let bytes = std::fs::read(query_path).map_err(|source| QueryError::Read {
        path: query_path.to_path_buf(),
        source,
    })?;
    let image = image::load_from_memory(&bytes).map_err(|source| QueryError::Decode {
        path: query_path.to_path_buf(),
        source,
    })?;

    let boxes = localizer.detect(&image)?;
    tracing::debug!(query = %query_path.display(), faces = boxes.len(), "query faces localized");

    let target_size = embedder.input_size();
    let mut matches = Vec::new();

    for face_box in &boxes {
        let Some((top, right, bottom, left)) = face_box.pixel_bounds(image.width(), image.height())
        else {
            tracing::warn!(query = %query_path.display(), "degenerate query face box, skipping");
            continue;
        };
        let crop = image.crop_imm(left, top, right - left, bottom - top);
        let Some(normalized) = normalize::letterbox(&crop, target_size) else {
            tracing::warn!(query = %query_path.display(), "empty query face crop, skipping");
            continue;
        };
        let query_vector = embedder.embed(&normalized)?;

        for record in store.records() {
            for face in &record.faces {
                if face.vector.is_empty() {
                    continue;
                }
                let distance = cosine_distance(&query_vector, &face.vector);
                if distance < threshold {
                    matches.push(MatchResult {
                        content_hash: record.content_hash.clone(),
                        file_name: record.file_name.clone(),
                        vector: face.vector.clone(),
                        distance,
                        crop_reference: face.crop_reference.clone(),
                    });
                }
            }
        }
    }

    tracing::info!(query = %query_path.display(), matches = matches.len(), "query finished");
    Ok(matches)
}

/// Cosine distance `1 − cos θ` between two vectors, in `[0, 2]`;
/// 0 means identical direction.
///
/// Degenerate input (length mismatch or zero norm) maps to 1.0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CaptureMetadata, FaceEmbedding, ImageRecord};
    use crate::testing::{face_box, write_png, StubEmbedder, StubLocalizer};

    #[test]
    fn test_cosine_distance_identical() {
        let v = vec![0.3f32, 0.4, 0.5];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_scale_invariant() {
        let a = vec![1.0f32, 2.0, 3.0];
        let b = vec![2.0f32, 4.0, 6.0];
        assert!(cosine_distance(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_degenerate_inputs() {
        assert_eq!(cosine_distance(&[1.0, 2.0], &[1.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    fn store_with(faces: Vec<(&str, Vec<f32>)>) -> FaceStore {
        let mut store = FaceStore::new();
        for (i, (hash, vector)) in faces.into_iter().enumerate() {
            let face_hash = format!("face-{i}");
            store.insert(ImageRecord {
                content_hash: hash.to_string(),
                file_name: format!("{hash}.png"),
                capture_metadata: CaptureMetadata::default(),
                faces: vec![FaceEmbedding {
                    vector,
                    face_hash,
                    crop_reference: format!("{hash}_1.png"),
                }],
            });
        }
        store
    }

    /// The stub embedder maps a solid-color crop to its channel means,
    /// so a stored vector equal to the query color gives distance 0.
    fn query_fixture(dir: &Path, color: [u8; 3]) -> PathBuf {
        let path = dir.join("query.png");
        write_png(&path, 64, 64, color);
        path
    }

    #[test]
    fn test_exact_match_has_distance_zero() {
        let dir = tempfile::tempdir().unwrap();
        let query = query_fixture(dir.path(), [200, 40, 40]);
        let store = store_with(vec![("aa", vec![200.0, 40.0, 40.0])]);

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 64.0, 64.0)]);
        let mut embedder = StubEmbedder;
        let matches = find_matches(
            &query,
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();

        assert_eq!(matches.len(), 1);
        assert!(matches[0].distance.abs() < 1e-6);
        assert_eq!(matches[0].content_hash, "aa");
        assert_eq!(matches[0].crop_reference, "aa_1.png");
    }

    #[test]
    fn test_unrelated_face_not_matched_at_default_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let query = query_fixture(dir.path(), [200, 0, 0]);
        // Orthogonal channel profile: cosine distance 1.0.
        let store = store_with(vec![("bb", vec![0.0, 0.0, 200.0])]);

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 64.0, 64.0)]);
        let mut embedder = StubEmbedder;
        let matches = find_matches(
            &query,
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();

        assert!(matches.is_empty());
    }

    #[test]
    fn test_threshold_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        let query = query_fixture(dir.path(), [200, 40, 40]);
        let store = store_with(vec![
            ("aa", vec![200.0, 40.0, 40.0]),
            ("bb", vec![180.0, 80.0, 60.0]),
            ("cc", vec![0.0, 0.0, 200.0]),
        ]);

        let mut run = |threshold: f32| {
            let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 64.0, 64.0)]);
            let mut embedder = StubEmbedder;
            find_matches(&query, &store, &mut localizer, &mut embedder, threshold).unwrap()
        };

        let tight = run(0.01);
        let loose = run(1.5);
        assert!(tight.len() <= loose.len());

        // Every tight match appears in the loose set with the same score.
        for m in &tight {
            let same = loose
                .iter()
                .find(|l| l.crop_reference == m.crop_reference)
                .expect("tight match missing from loose set");
            assert_eq!(same.distance, m.distance);
        }
    }

    #[test]
    fn test_empty_stored_vector_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let query = query_fixture(dir.path(), [200, 40, 40]);
        let store = store_with(vec![("aa", Vec::new()), ("bb", vec![200.0, 40.0, 40.0])]);

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 64.0, 64.0)]);
        let mut embedder = StubEmbedder;
        let matches = find_matches(
            &query,
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content_hash, "bb");
    }

    #[test]
    fn test_matches_follow_store_iteration_order() {
        let dir = tempfile::tempdir().unwrap();
        let query = query_fixture(dir.path(), [100, 100, 100]);
        // All equidistant from the query; order must be insertion order.
        let store = store_with(vec![
            ("zz", vec![100.0, 100.0, 100.0]),
            ("aa", vec![100.0, 100.0, 100.0]),
            ("mm", vec![100.0, 100.0, 100.0]),
        ]);

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 64.0, 64.0)]);
        let mut embedder = StubEmbedder;
        let matches = find_matches(
            &query,
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();

        let order: Vec<&str> = matches.iter().map(|m| m.content_hash.as_str()).collect();
        assert_eq!(order, vec!["zz", "aa", "mm"]);
    }

    #[test]
    fn test_unreadable_query_is_fatal() {
        let store = store_with(vec![("aa", vec![1.0, 2.0, 3.0])]);
        let mut localizer = StubLocalizer::none();
        let mut embedder = StubEmbedder;
        let err = find_matches(
            Path::new("/nonexistent/query.png"),
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Read { .. }));
    }

    #[test]
    fn test_undecodable_query_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let store = store_with(vec![]);
        let mut localizer = StubLocalizer::none();
        let mut embedder = StubEmbedder;
        let err = find_matches(
            &path,
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Decode { .. }));
    }

    #[test]
    fn test_query_detector_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let query = query_fixture(dir.path(), [10, 10, 10]);
        let store = store_with(vec![]);
        let mut localizer = StubLocalizer::failing();
        let mut embedder = StubEmbedder;
        let err = find_matches(
            &query,
            &store,
            &mut localizer,
            &mut embedder,
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Model(_)));
    }
}
