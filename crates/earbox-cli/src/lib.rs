//! Local backends for earbox
//!
//! - [`FsStorage`]: buckets as directories under one root
//! - [`TracingLogSink`]: log streams written to `tracing`
//! - [`ImageDecoder`]: PNG and JPEG decoding through the `image` crate

use earbox_core::api::{Decoder, ListPage, LogSink, ObjectSummary, Storage};
use earbox_core::error::{SinkError, StorageError};
use earbox_core::types::{DeliveryToken, LogEvent, LogLevel, ObjectKey, PixelGrid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Keys returned per listing page unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Object storage backed by a local directory
///
/// Each bucket is a subdirectory of the root; keys are `/`-separated paths
/// relative to it. Listings are sorted by key.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    page_size: usize,
}

impl FsStorage {
    /// Storage rooted at `root`; buckets are its subdirectories
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Cap listing pages at `page_size` keys (at least one)
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Directory holding the buckets
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(bucket);
        if bucket.is_empty() || bucket.contains(&['/', '\\'][..]) || !dir.is_dir() {
            return Err(StorageError::NoSuchBucket(bucket.to_string()));
        }
        Ok(dir)
    }

    /// Path of `key` inside `bucket`; keys may not leave the bucket
    fn object_path(&self, bucket: &str, key: &ObjectKey) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        let relative = Path::new(key.as_str());
        if key.as_str().is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::AccessDenied(key.to_string()));
        }
        Ok(dir.join(relative))
    }

    fn keys_under(&self, dir: &Path, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) {
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|e| StorageError::Unavailable(e.to_string()))?
                .len();
            objects.push(ObjectSummary {
                key: ObjectKey::new(key),
                size,
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

fn map_io(error: io::Error, bucket: &str, key: &ObjectKey) -> StorageError {
    match error.kind() {
        io::ErrorKind::NotFound => StorageError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        io::ErrorKind::PermissionDenied => StorageError::AccessDenied(key.to_string()),
        _ => StorageError::Unavailable(error.to_string()),
    }
}

impl Storage for FsStorage {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        let offset = match continuation {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StorageError::InvalidContinuation(token.to_string()))?,
        };

        let all = self.keys_under(&dir, prefix)?;
        let end = offset.saturating_add(self.page_size).min(all.len());
        let objects = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_continuation = (end < all.len()).then(|| end.to_string());

        Ok(ListPage {
            objects,
            next_continuation,
        })
    }

    fn get(&self, bucket: &str, key: &ObjectKey) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        if path.is_dir() {
            return Err(StorageError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        std::fs::read(&path).map_err(|e| map_io(e, bucket, key))
    }

    fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io(e, bucket, key))?;
        }
        std::fs::write(&path, body).map_err(|e| map_io(e, bucket, key))
    }
}

/// Log sink that writes every event through `tracing`
///
/// Tokens are per-stream sequence numbers; an append with any other token
/// than the last one issued is rejected.
#[derive(Debug, Default)]
pub struct TracingLogSink {
    sequences: Mutex<HashMap<(String, String), u64>>,
}

impl TracingLogSink {
    /// Sink with no streams yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for TracingLogSink {
    fn ensure_stream(&self, group: &str, stream: &str) -> Result<(), SinkError> {
        self.sequences
            .lock()
            .entry((group.to_string(), stream.to_string()))
            .or_insert(0);
        Ok(())
    }

    fn append(
        &self,
        group: &str,
        stream: &str,
        event: &LogEvent,
        token: Option<&DeliveryToken>,
    ) -> Result<DeliveryToken, SinkError> {
        let mut sequences = self.sequences.lock();
        let sequence = sequences
            .get_mut(&(group.to_string(), stream.to_string()))
            .ok_or_else(|| SinkError::StreamNotFound {
                group: group.to_string(),
                stream: stream.to_string(),
            })?;

        let expected = (*sequence > 0).then(|| sequence.to_string());
        if token.map(DeliveryToken::as_str) != expected.as_deref() {
            return Err(SinkError::InvalidSequenceToken { expected });
        }

        let line = event.formatted();
        match event.level {
            LogLevel::Info => tracing::info!(target: "earbox::sink", group, stream, "{}", line),
            LogLevel::Warning => tracing::warn!(target: "earbox::sink", group, stream, "{}", line),
            LogLevel::Error => tracing::error!(target: "earbox::sink", group, stream, "{}", line),
        }

        *sequence += 1;
        Ok(DeliveryToken::new(sequence.to_string()))
    }
}

/// Decoder for PNG and JPEG files
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Option<PixelGrid> {
        let decoded = image::load_from_memory(bytes).ok()?;
        Some(PixelGrid {
            width: decoded.width(),
            height: decoded.height(),
            channels: decoded.color().channel_count(),
        })
    }
}
