//! Image ingest pipeline
//!
//! Lists a prefix, fetches every image-typed object and decodes it. Each
//! object yields one `IngestResult`; a fetch or decode failure is recorded
//! against that object and the pass moves on to the next key.

use crate::api::{Decoder, Storage};
use crate::log_stream::LogStream;
use crate::types::ObjectKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Extensions treated as images, compared case-insensitively
pub const IMAGE_EXTENSIONS: [&str; 3] = [".png", ".jpg", ".jpeg"];

/// Whether the key names an image by extension
#[must_use]
pub fn is_image_key(key: &ObjectKey) -> bool {
    let lower = key.as_str().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Why an object could not be ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The object could not be read from storage
    Fetch,
    /// The bytes were read but are not a decodable image
    Decode,
}

/// Outcome for one processed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestResult {
    /// Image decoded
    Success {
        /// Object processed
        key: ObjectKey,
        /// Columns
        width: u32,
        /// Rows
        height: u32,
        /// Samples per pixel
        channels: u8,
    },
    /// Image skipped
    Error {
        /// Object processed
        key: ObjectKey,
        /// What went wrong
        reason: String,
        /// Which step failed
        kind: FailureKind,
    },
}

impl IngestResult {
    /// Object the result is for
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Success { key, .. } | Self::Error { key, .. } => key,
        }
    }

    /// Whether the image decoded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Results of one ingest pass with its counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// One result per image, in listing order
    pub results: Vec<IngestResult>,
    /// Every listed object, images or not
    pub total_files: usize,
    /// Images decoded
    pub processed: usize,
    /// Images that failed
    pub errors: usize,
}

impl IngestReport {
    fn record(&mut self, result: IngestResult) {
        if result.is_success() {
            self.processed += 1;
        } else {
            self.errors += 1;
        }
        self.results.push(result);
    }

    /// Drop the counts
    #[must_use]
    pub fn into_results(self) -> Vec<IngestResult> {
        self.results
    }
}

/// Fetches and decodes the images under one bucket prefix
pub struct ImageIngestPipeline {
    storage: Arc<dyn Storage>,
    decoder: Arc<dyn Decoder>,
    bucket: String,
}

impl ImageIngestPipeline {
    /// Pipeline over `bucket`
    pub fn new(storage: Arc<dyn Storage>, decoder: Arc<dyn Decoder>, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            decoder,
            bucket: bucket.into(),
        }
    }

    /// Process every image under `prefix`
    ///
    /// With no prefix nothing is listed and the report is empty. A listing
    /// failure is logged and likewise yields an empty report.
    pub fn run(&self, prefix: Option<&str>, log: &mut LogStream) -> IngestReport {
        let mut report = IngestReport::default();
        let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
            log.info("No prefix provided, skipping image processing");
            return report;
        };

        log.info(format!(
            "Starting image processing from bucket: {}, prefix: {}",
            self.bucket, prefix
        ));

        let objects = match self.storage.list_all(&self.bucket, prefix) {
            Ok(objects) => objects,
            Err(e) => {
                log.error(format!("Failed to list {}/{}: {}", self.bucket, prefix, e));
                return report;
            }
        };

        for object in objects {
            report.total_files += 1;
            if is_image_key(&object.key) {
                let result = self.process_key(&object.key, log);
                report.record(result);
            }
        }

        log.info(format!(
            "Image processing complete. Total: {}, Processed: {}, Errors: {}",
            report.total_files, report.processed, report.errors
        ));
        report
    }

    /// Fetch and decode a single object
    pub fn process_key(&self, key: &ObjectKey, log: &mut LogStream) -> IngestResult {
        log.info(format!("Processing image: {key}"));

        let bytes = match self.storage.get(&self.bucket, key) {
            Ok(bytes) => bytes,
            Err(e) => {
                log.error(format!("Error processing {key}: {e}"));
                return IngestResult::Error {
                    key: key.clone(),
                    reason: e.to_string(),
                    kind: FailureKind::Fetch,
                };
            }
        };

        match self.decoder.decode(&bytes) {
            Some(grid) => {
                log.info(format!(
                    "Successfully processed: {key} ({}x{})",
                    grid.width, grid.height
                ));
                IngestResult::Success {
                    key: key.clone(),
                    width: grid.width,
                    height: grid.height,
                    channels: grid.channels,
                }
            }
            None => {
                log.error(format!("Failed to decode image: {key}"));
                IngestResult::Error {
                    key: key.clone(),
                    reason: "Could not decode image".to_string(),
                    kind: FailureKind::Decode,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_keys_match_case_insensitively() {
        for key in ["a/b.png", "a/b.JPG", "a/b.Jpeg", "V1xM@a.jpg"] {
            assert!(is_image_key(&ObjectKey::new(key)), "{key}");
        }
        for key in ["a/session_para", "a/b.gif", "a/jpg", "a/b.jpg.txt"] {
            assert!(!is_image_key(&ObjectKey::new(key)), "{key}");
        }
    }

    #[test]
    fn results_serialize_with_status_tag() {
        let ok = IngestResult::Success {
            key: ObjectKey::new("a.png"),
            width: 4,
            height: 3,
            channels: 3,
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["width"], 4);

        let err = IngestResult::Error {
            key: ObjectKey::new("b.png"),
            reason: "Could not decode image".into(),
            kind: FailureKind::Decode,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "decode");
        assert_eq!(json["reason"], "Could not decode image");
    }
}
