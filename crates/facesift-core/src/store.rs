//! The in-memory face store and its record types.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Camera and capture tags read from an image's EXIF block.
///
/// Every field is optional; an image with no usable tags carries the
/// default (empty) value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl CaptureMetadata {
    pub fn is_empty(&self) -> bool {
        self.camera_make.is_none()
            && self.camera_model.is_none()
            && self.capture_date.is_none()
            && self.capture_time.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

/// One distinct detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEmbedding {
    /// Fixed-length descriptor produced by the embedding capability.
    pub vector: Vec<f32>,
    /// Digest of `vector`'s byte payload; unique across the whole store.
    pub face_hash: String,
    /// File name of the persisted normalized crop:
    /// `"{content_hash}_{index}.png"`, index 1-based over accepted faces.
    pub crop_reference: String,
}

/// One unique source image, keyed by content hash.
///
/// Created the first time its content hash is seen during ingestion;
/// after that only `faces` grows, within the same run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub content_hash: String,
    pub file_name: String,
    pub capture_metadata: CaptureMetadata,
    pub faces: Vec<FaceEmbedding>,
}

/// Insertion-ordered map from content hash to [`ImageRecord`].
///
/// Iteration order is ingestion order. Match results are defined in
/// terms of store iteration order, so it must be deterministic.
#[derive(Debug, Default)]
pub struct FaceStore {
    records: Vec<ImageRecord>,
    by_hash: HashMap<String, usize>,
}

impl FaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.by_hash.contains_key(content_hash)
    }

    pub fn get(&self, content_hash: &str) -> Option<&ImageRecord> {
        self.by_hash.get(content_hash).map(|&i| &self.records[i])
    }

    /// Insert a record under its content hash. Re-inserting an existing
    /// hash replaces the record in place, keeping its original position.
    pub fn insert(&mut self, record: ImageRecord) {
        match self.by_hash.get(&record.content_hash) {
            Some(&i) => self.records[i] = record,
            None => {
                self.by_hash
                    .insert(record.content_hash.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    /// Number of unique images.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total number of stored faces across all images.
    pub fn face_count(&self) -> usize {
        self.records.iter().map(|r| r.faces.len()).sum()
    }
}

/// One qualifying stored face for one query, with provenance.
///
/// Ephemeral: produced fresh per query, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub content_hash: String,
    pub file_name: String,
    /// The stored embedding that matched.
    pub vector: Vec<f32>,
    /// Cosine distance to the query face; lower is closer, 0 identical.
    pub distance: f32,
    pub crop_reference: String,
}
