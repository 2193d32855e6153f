//! SCRFD face localizer via ONNX Runtime.
//!
//! Runs the SCRFD (Sample and Computation Redistribution for Efficient
//! Face Detection) model with 3-stride anchor-free decoding and NMS
//! post-processing, and reports boxes in source-image pixel space.

use facesift_core::model::{FaceBox, FaceLocalizer, ModelError};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face localizer.
#[derive(Debug)]
pub struct ScrfdLocalizer {
    session: Session,
    confidence_threshold: f32,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdLocalizer {
    /// Load the SCRFD ONNX model and keep the session for the life of
    /// the process. Boxes scoring below `confidence_threshold` are
    /// discarded before NMS.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(2)?))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 6 {
            return Err(ModelError::Inference(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        // Discover output ordering by name. SCRFD exports may name tensors
        // as "score_8"/"bbox_8"/... or as generic integers ("448", ...).
        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            confidence_threshold,
            stride_indices,
        })
    }

    /// Preprocess an RGB image into a 640×640 NCHW float tensor with
    /// centered letterbox padding.
    ///
    /// InsightFace SCRFD exports expect BGR channel order and symmetric
    /// pixel normalization around `SCRFD_MEAN`. The tensor is
    /// zero-initialized, which is exactly the normalized value of the
    /// mean-gray padding.
    fn preprocess(&self, image: &DynamicImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = (image.width() as f32, image.height() as f32);
        let scale = SCRFD_INPUT_SIZE as f32 / width.max(height);
        let new_w = ((width * scale) as u32).max(1);
        let new_h = ((height * scale) as u32).max(1);

        let resized = image
            .resize_exact(new_w, new_h, FilterType::Triangle)
            .to_rgb8();

        let pad_x = (SCRFD_INPUT_SIZE as f32 - new_w as f32) / 2.0;
        let pad_y = (SCRFD_INPUT_SIZE as f32 - new_h as f32) / 2.0;
        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        let size = SCRFD_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..new_h as usize {
            for x in 0..new_w as usize {
                let pixel = resized.get_pixel(x as u32, y as u32);
                // RGB → BGR
                tensor[[0, 0, y + pad_y_start, x + pad_x_start]] =
                    (f32::from(pixel[2]) - SCRFD_MEAN) / SCRFD_STD;
                tensor[[0, 1, y + pad_y_start, x + pad_x_start]] =
                    (f32::from(pixel[1]) - SCRFD_MEAN) / SCRFD_STD;
                tensor[[0, 2, y + pad_y_start, x + pad_x_start]] =
                    (f32::from(pixel[0]) - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceLocalizer for ScrfdLocalizer {
    /// Detect faces, returning boxes in source-image pixel coordinates
    /// sorted by descending confidence.
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<FaceBox>, ModelError> {
        let (input, letterbox) = self.preprocess(image);

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Inference(format!("bboxes stride {stride}: {e}")))?;

            let detections = decode_stride(
                scores,
                bboxes,
                stride,
                (image.width() as f32, image.height() as f32),
                &letterbox,
                self.confidence_threshold,
            );
            all_detections.extend(detections);
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(faces = result.len(), "SCRFD detection finished");
        Ok(result)
    }
}

/// Discover output tensor ordering by name.
///
/// If the "score_8"/"bbox_8" naming pattern is present, map names to
/// stride slots; otherwise fall back to the standard positional layout:
/// `[0-2]` = scores (strides 8/16/32), `[3-5]` = bboxes. Keypoint
/// outputs, when present, occupy `[6-8]` and are ignored.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES
        .iter()
        .all(|&stride| find("score", stride).is_some() && find("bbox", stride).is_some());

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            (find("score", stride).unwrap(), find("bbox", stride).unwrap())
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
        );
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode detections for one stride level into source-image pixel space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    image_size: (f32, f32),
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceBox> {
    let (image_w, image_h) = image_size;
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let cy = (anchor_idx / grid) as f32;
        let cx = (anchor_idx % grid) as f32;

        let anchor_cx = cx * stride as f32;
        let anchor_cy = cy * stride as f32;

        // Bbox deltas: [left, top, right, bottom offsets] × stride
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[bbox_off] * stride as f32;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride as f32;

        // Map from letterboxed space back to the original image space.
        let orig_x1 = ((x1 - letterbox.pad_x) / letterbox.scale).clamp(0.0, image_w);
        let orig_y1 = ((y1 - letterbox.pad_y) / letterbox.scale).clamp(0.0, image_h);
        let orig_x2 = ((x2 - letterbox.pad_x) / letterbox.scale).clamp(0.0, image_w);
        let orig_y2 = ((y2 - letterbox.pad_y) / letterbox.scale).clamp(0.0, image_h);

        if orig_x2 <= orig_x1 || orig_y2 <= orig_y1 {
            continue;
        }

        detections.push(FaceBox {
            top: orig_y1,
            left: orig_x1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.left.max(b.left);
    let y1 = a.top.max(b.top);
    let x2 = (a.left + a.width).min(b.left + b.width);
    let y2 = (a.top + a.height).min(b.top + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
