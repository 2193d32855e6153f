//! Recursive folder ingestion: the walker that builds a [`FaceStore`].

use crate::extract::{extract_faces, ExtractContext};
use crate::hash;
use crate::job::CancelToken;
use crate::metadata;
use crate::model::{FaceEmbedder, FaceLocalizer};
use crate::store::{FaceStore, ImageRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions accepted for ingestion, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpeg", "jpg", "bmp"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("cannot create crop output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Walk `root` recursively and ingest every candidate image.
///
/// Per-file problems (unreadable bytes, undecodable image, detector
/// failure) are logged and skipped. `on_progress` fires after every
/// candidate — skipped or stored — with the percentage of candidates
/// visited, so it is monotonic and reaches 100 exactly when the walk
/// finishes. The cancel token is polled once per candidate, never
/// mid-file; a cancelled walk returns the partial store built so far,
/// which is a valid result rather than an error.
pub fn ingest(
    root: &Path,
    crop_dir: &Path,
    localizer: &mut dyn FaceLocalizer,
    embedder: &mut dyn FaceEmbedder,
    on_progress: &mut dyn FnMut(f32),
    cancel: &CancelToken,
) -> Result<FaceStore, IngestError> {
    std::fs::create_dir_all(crop_dir).map_err(|source| IngestError::CreateOutputDir {
        path: crop_dir.to_path_buf(),
        source,
    })?;

    let candidates = collect_candidates(root);
    let total = candidates.len();
    tracing::info!(root = %root.display(), candidates = total, "starting ingestion");

    let mut store = FaceStore::new();
    let mut seen_faces: HashSet<String> = HashSet::new();

    for (idx, path) in candidates.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(visited = idx, total, "ingestion cancelled, returning partial store");
            return Ok(store);
        }

        ingest_one(path, localizer, embedder, &mut store, &mut seen_faces, crop_dir);

        on_progress((idx + 1) as f32 / total as f32 * 100.0);
    }

    tracing::info!(
        images = store.len(),
        faces = store.face_count(),
        "ingestion finished"
    );
    Ok(store)
}

/// Process one candidate file into the store. All failure modes are
/// recoverable: log, leave the store untouched, move on.
fn ingest_one(
    path: &Path,
    localizer: &mut dyn FaceLocalizer,
    embedder: &mut dyn FaceEmbedder,
    store: &mut FaceStore,
    seen_faces: &mut HashSet<String>,
    crop_dir: &Path,
) {
    let bytes = match std::fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "empty file, skipping");
            return;
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable file, skipping");
            return;
        }
    };

    let image = match image::load_from_memory(&bytes) {
        Ok(image) => image,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "undecodable image, skipping");
            return;
        }
    };

    let content_hash = hash::hash_bytes(&bytes);
    if store.contains(&content_hash) {
        tracing::debug!(path = %path.display(), %content_hash, "duplicate image content, skipping");
        return;
    }

    let capture_metadata = metadata::read_capture_metadata(path);

    let boxes = match localizer.detect(&image) {
        Ok(boxes) => boxes,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "face detection failed, skipping image");
            return;
        }
    };
    if boxes.is_empty() {
        tracing::debug!(path = %path.display(), "no faces detected");
        return;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut ctx = ExtractContext {
        embedder,
        seen_faces,
        crop_dir,
    };
    let faces = extract_faces(&image, &boxes, &content_hash, &mut ctx);
    tracing::debug!(path = %path.display(), detected = boxes.len(), stored = faces.len(), "image ingested");

    store.insert(ImageRecord {
        content_hash,
        file_name,
        capture_metadata,
        faces,
    });
}

/// Candidate files under `root`, in a deterministic traversal order.
fn collect_candidates(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "unreadable directory entry, skipping");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_image_extension(path))
        .collect()
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|ok| ext.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_box, write_png, write_split_png, StubEmbedder, StubLocalizer};
    use std::path::Path;

    /// Separate photo root and crop dir, so crops written by one run can
    /// never become candidates of another.
    fn fixture_dirs(dir: &Path) -> (PathBuf, PathBuf) {
        let photos = dir.join("photos");
        std::fs::create_dir_all(&photos).unwrap();
        (photos, dir.join("crops"))
    }

    fn ingest_with(
        root: &Path,
        crops: &Path,
        localizer: &mut StubLocalizer,
        progress: &mut Vec<f32>,
    ) -> FaceStore {
        let mut embedder = StubEmbedder;
        let cancel = CancelToken::new();
        let mut on_progress = |p: f32| progress.push(p);
        ingest(root, crops, localizer, &mut embedder, &mut on_progress, &cancel).unwrap()
    }

    #[test]
    fn test_extension_filter() {
        assert!(has_image_extension(Path::new("a/b/photo.PNG")));
        assert!(has_image_extension(Path::new("photo.JpEg")));
        assert!(has_image_extension(Path::new("photo.bmp")));
        assert!(!has_image_extension(Path::new("photo.gif")));
        assert!(!has_image_extension(Path::new("photo")));
        assert!(!has_image_extension(Path::new("photo.png.txt")));
    }

    #[test]
    fn test_identical_bytes_under_two_names_make_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        write_png(&photos.join("one.png"), 64, 64, [200, 40, 40]);
        write_png(&photos.join("two.png"), 64, 64, [200, 40, 40]);

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 32.0, 32.0)]);
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);

        assert_eq!(store.len(), 1);
        assert_eq!(progress.len(), 2);
        assert_eq!(*progress.last().unwrap(), 100.0);
    }

    #[test]
    fn test_corrupt_file_is_skipped_and_progress_reaches_100() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        write_png(&photos.join("good.png"), 64, 64, [200, 40, 40]);
        std::fs::write(photos.join("broken.jpg"), b"not an image at all").unwrap();
        std::fs::write(photos.join("empty.png"), b"").unwrap();

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 32.0, 32.0)]);
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);

        assert_eq!(store.len(), 1);
        assert_eq!(progress.len(), 3);
        assert!((progress.last().unwrap() - 100.0).abs() < 1e-4);
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_face_images_are_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        write_png(&photos.join("landscape.png"), 64, 64, [10, 120, 10]);

        let mut localizer = StubLocalizer::none();
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);

        assert!(store.is_empty());
        assert_eq!(progress, vec![100.0]);
    }

    #[test]
    fn test_detector_failure_skips_image() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        write_png(&photos.join("a.png"), 64, 64, [10, 120, 10]);

        let mut localizer = StubLocalizer::failing();
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);

        assert!(store.is_empty());
        assert_eq!(progress, vec![100.0]);
    }

    #[test]
    fn test_one_image_two_faces_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        write_split_png(&photos.join("pair.png"), 100, 50, [220, 10, 10], [10, 10, 220]);

        let mut localizer = StubLocalizer::fixed(vec![
            face_box(0.0, 0.0, 40.0, 40.0),
            face_box(0.0, 60.0, 40.0, 40.0),
        ]);
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);

        assert_eq!(store.len(), 1);
        let record = store.records().next().unwrap();
        assert_eq!(record.faces.len(), 2);
        assert_eq!(record.file_name, "pair.png");
        assert!(crops.join(&record.faces[0].crop_reference).exists());
        assert!(crops.join(&record.faces[1].crop_reference).exists());
    }

    #[test]
    fn test_face_dedup_across_images() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        // Same face content in two byte-distinct images (different sizes).
        write_png(&photos.join("a.png"), 64, 64, [200, 40, 40]);
        write_png(&photos.join("b.png"), 96, 96, [200, 40, 40]);

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 48.0, 48.0)]);
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);

        // Both images stored (different content hashes) but the identical
        // embedding is kept only once, for whichever image came first.
        assert_eq!(store.len(), 2);
        assert_eq!(store.face_count(), 1);
    }

    #[test]
    fn test_ingestion_is_idempotent_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, _) = fixture_dirs(dir.path());
        write_split_png(&photos.join("pair.png"), 100, 50, [220, 10, 10], [10, 10, 220]);
        write_png(&photos.join("solo.png"), 64, 64, [90, 90, 90]);

        let mut run = |crops: &Path| {
            let mut localizer = StubLocalizer::fixed(vec![
                face_box(0.0, 0.0, 40.0, 40.0),
                face_box(0.0, 60.0, 40.0, 40.0),
            ]);
            let mut progress = Vec::new();
            ingest_with(&photos, crops, &mut localizer, &mut progress)
        };

        let first = run(&dir.path().join("crops1"));
        let second = run(&dir.path().join("crops2"));

        let keys = |s: &FaceStore| {
            s.records()
                .map(|r| (r.content_hash.clone(), r.faces.len()))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn test_cancellation_mid_walk_returns_partial_store() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        for (i, color) in [[10u8, 0, 0], [0, 20, 0], [0, 0, 30], [40, 40, 0], [0, 50, 50]]
            .iter()
            .enumerate()
        {
            write_png(&photos.join(format!("img{i}.png")), 64, 64, *color);
        }

        let mut localizer = StubLocalizer::fixed(vec![face_box(0.0, 0.0, 32.0, 32.0)]);
        let mut embedder = StubEmbedder;
        let cancel = CancelToken::new();
        let cancel_after: usize = 2;
        let mut calls: usize = 0;
        let mut on_progress = |_p: f32| {
            calls += 1;
            if calls == cancel_after {
                cancel.request_cancel();
            }
        };

        let store = ingest(
            &photos,
            &crops,
            &mut localizer,
            &mut embedder,
            &mut on_progress,
            &cancel,
        )
        .unwrap();

        assert_eq!(store.len(), cancel_after);
        assert_eq!(calls, cancel_after);
    }

    #[test]
    fn test_empty_folder_yields_empty_store_and_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (photos, crops) = fixture_dirs(dir.path());
        let mut localizer = StubLocalizer::none();
        let mut progress = Vec::new();
        let store = ingest_with(&photos, &crops, &mut localizer, &mut progress);
        assert!(store.is_empty());
        assert!(progress.is_empty());
    }
}
