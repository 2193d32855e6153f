//! Aspect-preserving letterbox normalization of face crops.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

/// Resize `crop` to exactly `size` (`(height, width)`) without
/// distorting it.
///
/// When the aspect ratios differ, the limiting dimension is scaled to
/// fit and the remainder is padded with black, split floor/ceil across
/// the two sides. The face is never stretched, whatever shape the
/// detector's box has.
///
/// Returns `None` for a zero-dimension crop; callers skip that face.
pub fn letterbox(crop: &DynamicImage, size: (u32, u32)) -> Option<RgbImage> {
    let (target_h, target_w) = size;
    let (w, h) = (crop.width(), crop.height());
    if w == 0 || h == 0 || target_w == 0 || target_h == 0 {
        return None;
    }

    let aspect = w as f64 / h as f64;
    let target_aspect = target_w as f64 / target_h as f64;

    if (aspect - target_aspect).abs() < 1e-9 {
        return Some(
            crop.resize_exact(target_w, target_h, FilterType::Triangle)
                .to_rgb8(),
        );
    }

    let mut canvas = RgbImage::new(target_w, target_h);
    if aspect < target_aspect {
        // Narrower than the target: fit height, pad the width.
        let scale = target_h as f64 / h as f64;
        let new_w = ((w as f64 * scale) as u32).clamp(1, target_w);
        let scaled = crop
            .resize_exact(new_w, target_h, FilterType::Triangle)
            .to_rgb8();
        let left_pad = (target_w - new_w) / 2;
        imageops::overlay(&mut canvas, &scaled, i64::from(left_pad), 0);
    } else {
        // Wider: fit width, pad the height.
        let scale = target_w as f64 / w as f64;
        let new_h = ((h as f64 * scale) as u32).clamp(1, target_h);
        let scaled = crop
            .resize_exact(target_w, new_h, FilterType::Triangle)
            .to_rgb8();
        let top_pad = (target_h - new_h) / 2;
        imageops::overlay(&mut canvas, &scaled, 0, i64::from(top_pad));
    }

    Some(canvas)
}
