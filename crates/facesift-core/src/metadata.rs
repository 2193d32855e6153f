//! EXIF capture metadata extraction.

use crate::store::CaptureMetadata;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read camera make/model, capture timestamp, and GPS position from an
/// image's embedded tags.
///
/// Any read or parse failure degrades to an empty [`CaptureMetadata`]:
/// metadata problems never fail ingestion of an otherwise valid image.
pub fn read_capture_metadata(path: &Path) -> CaptureMetadata {
    match try_read(path) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no usable EXIF data");
            CaptureMetadata::default()
        }
    }
}

fn try_read(path: &Path) -> Result<CaptureMetadata, exif::Error> {
    let file = File::open(path).map_err(exif::Error::Io)?;
    let mut reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut reader)?;

    let mut meta = CaptureMetadata {
        camera_make: ascii_value(&exif, Tag::Make),
        camera_model: ascii_value(&exif, Tag::Model),
        ..Default::default()
    };

    let raw_datetime = ascii_value(&exif, Tag::DateTimeDigitized)
        .or_else(|| ascii_value(&exif, Tag::DateTimeOriginal))
        .or_else(|| ascii_value(&exif, Tag::DateTime));
    if let Some((date, time)) = raw_datetime.as_deref().and_then(split_datetime) {
        meta.capture_date = Some(date);
        meta.capture_time = Some(time);
    }

    meta.latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    meta.longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);

    Ok(meta)
}

/// Split an EXIF `"YYYY:MM:DD HH:MM:SS"` string into date and time.
fn split_datetime(raw: &str) -> Option<(NaiveDate, NaiveTime)> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| (dt.date(), dt.time()))
}

fn ascii_value(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(|s| s.trim_matches('\u{0}').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    if parts.len() < 3 {
        return None;
    }
    let hemisphere = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(values) => values
                .first()
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .map(str::to_string),
            _ => None,
        });
    Some(to_decimal(
        [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()],
        hemisphere.as_deref(),
    ))
}

/// Degrees/minutes/seconds to signed decimal degrees; southern and
/// western hemispheres are negative.
fn to_decimal(dms: [f64; 3], hemisphere: Option<&str>) -> f64 {
    let decimal = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    match hemisphere.map(|h| h.trim().to_ascii_uppercase()) {
        Some(h) if h == "S" || h == "W" => -decimal,
        _ => decimal,
    }
}
