//! Per-image face extraction: crop → normalize → embed → dedup → persist.

use crate::hash;
use crate::model::{FaceBox, FaceEmbedder};
use crate::normalize;
use crate::store::FaceEmbedding;
use image::DynamicImage;
use std::collections::HashSet;
use std::path::Path;

/// Borrowed per-run extraction state.
///
/// `seen_faces` is owned by the ingestion walker for the lifetime of one
/// run and threaded through here by mutable borrow; it is never shared
/// across concurrent runs.
pub struct ExtractContext<'a> {
    pub embedder: &'a mut dyn FaceEmbedder,
    pub seen_faces: &'a mut HashSet<String>,
    pub crop_dir: &'a Path,
}

/// Run the crop/normalize/embed/dedup/persist chain for every detected
/// box of one image, in detector order.
///
/// Per-face failures are logged and skipped, never aborting the image.
/// The 1-based crop index only advances for accepted faces, so a
/// duplicate face leaves no hole in the crop numbering. A face is
/// registered in the dedup set only after its crop file is on disk.
pub fn extract_faces(
    image: &DynamicImage,
    boxes: &[FaceBox],
    content_hash: &str,
    ctx: &mut ExtractContext<'_>,
) -> Vec<FaceEmbedding> {
    let target_size = ctx.embedder.input_size();
    let mut faces = Vec::new();

    for face_box in boxes {
        let Some((top, right, bottom, left)) = face_box.pixel_bounds(image.width(), image.height())
        else {
            tracing::warn!(content_hash, "face box degenerate after clamping, skipping");
            continue;
        };

        let crop = image.crop_imm(left, top, right - left, bottom - top);
        let Some(normalized) = normalize::letterbox(&crop, target_size) else {
            tracing::warn!(content_hash, "empty face crop, skipping");
            continue;
        };

        let vector = match ctx.embedder.embed(&normalized) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(content_hash, error = %err, "embedding failed for face, skipping");
                continue;
            }
        };

        let face_hash = hash::hash_vector(&vector);
        if ctx.seen_faces.contains(&face_hash) {
            tracing::debug!(content_hash, %face_hash, "duplicate face embedding, skipping");
            continue;
        }

        let crop_reference = format!("{}_{}.png", content_hash, faces.len() + 1);
        let crop_path = ctx.crop_dir.join(&crop_reference);
        if let Err(err) = normalized.save(&crop_path) {
            tracing::warn!(path = %crop_path.display(), error = %err, "failed to persist face crop, skipping");
            continue;
        }

        ctx.seen_faces.insert(face_hash.clone());
        faces.push(FaceEmbedding {
            vector,
            face_hash,
            crop_reference,
        });
    }

    faces
}
