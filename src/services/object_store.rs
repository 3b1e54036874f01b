//! ObjectStore: the key/value byte-object abstraction the cache sits on.
//!
//! Two backends implement it: `DiskObjectStore` (SQLite metadata plus
//! sharded payload files, see `disk_store.rs`) and `InMemoryObjectStore`
//! below, which backs ephemeral runs and unit tests.

use crate::models::{
    listing::ListingPage,
    media::{ByteStream, MediaBody, MediaObject, ObjectRecord},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, io, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid continuation token")]
    InvalidPageToken,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of one readiness check against a backend.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub error: Option<String>,
}

impl ReadinessCheck {
    pub fn ok(name: &'static str) -> Self {
        Self { name, error: None }
    }

    pub fn failed(name: &'static str, error: impl Into<String>) -> Self {
        Self {
            name,
            error: Some(error.into()),
        }
    }
}

/// Durable bucket of immutable byte objects.
///
/// Implementations must allow concurrent reads and concurrent writes to
/// distinct keys without external locking. Writes to the same key are
/// last-write-wins. Listing is eventually consistent: objects written while
/// an enumeration is in progress may or may not appear in it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a fully buffered body under `key`.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<ObjectRecord>;

    /// Store a streamed body under `key`.
    ///
    /// An `Err` item in `stream` aborts the write and nothing becomes
    /// visible under `key`. The default drains into memory and calls `put`.
    async fn put_stream(
        &self,
        key: &str,
        stream: ByteStream,
        content_type: &str,
    ) -> StoreResult<ObjectRecord> {
        let body = MediaBody::Streaming(stream).into_bytes().await?;
        self.put(key, body, content_type).await
    }

    /// Whether `put_stream` writes incrementally instead of buffering.
    fn supports_streaming_writes(&self) -> bool {
        false
    }

    /// Read an object; `None` when the key is absent.
    async fn get(&self, key: &str) -> StoreResult<Option<MediaObject>>;

    /// Read one page of object metadata, starting after `page_token`.
    async fn list(&self, page_token: Option<&str>) -> StoreResult<ListingPage>;

    /// Check the backend for the readiness endpoint.
    async fn readiness(&self) -> Vec<ReadinessCheck>;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/`, contain `..`,
/// backslashes or control characters.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Hex MD5 of a body, used as its ETag.
pub fn compute_etag(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    etag: String,
    uploaded_at: DateTime<Utc>,
}

impl StoredObject {
    fn record(&self, key: &str) -> ObjectRecord {
        ObjectRecord {
            key: key.to_string(),
            size: self.data.len() as u64,
            etag: self.etag.clone(),
            uploaded_at: self.uploaded_at,
            content_type: Some(self.content_type.clone()),
        }
    }
}

/// In-memory backend for ephemeral runs and tests.
///
/// Keys live in a `BTreeMap` so listing pages come back in key order; the
/// continuation token is the last key of the previous page.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    page_size: usize,
}

impl InMemoryObjectStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: page_size.max(1),
        }
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<ObjectRecord> {
        ensure_key_safe(key)?;
        let stored = StoredObject {
            etag: compute_etag(&body),
            data: body,
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        };
        let record = stored.record(key);
        self.objects.write().await.insert(key.to_string(), stored);
        Ok(record)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<MediaObject>> {
        ensure_key_safe(key)?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|obj| MediaObject {
            body: MediaBody::Buffered(obj.data.clone()),
            content_type: obj.content_type.clone(),
            size: obj.data.len() as u64,
            etag: obj.etag.clone(),
            uploaded_at: obj.uploaded_at,
        }))
    }

    async fn list(&self, page_token: Option<&str>) -> StoreResult<ListingPage> {
        use std::ops::Bound;

        let objects = self.objects.read().await;
        let lower = match page_token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };
        let mut iter = objects.range((lower, Bound::Unbounded));
        let records: Vec<ObjectRecord> = iter
            .by_ref()
            .take(self.page_size)
            .map(|(key, obj)| obj.record(key))
            .collect();
        let truncated = iter.next().is_some();
        let next_page_token = if truncated {
            records.last().map(|r| r.key.clone())
        } else {
            None
        };

        Ok(ListingPage {
            records,
            truncated,
            next_page_token,
        })
    }

    async fn readiness(&self) -> Vec<ReadinessCheck> {
        vec![ReadinessCheck::ok("memory")]
    }
}

#[cfg(test)]
impl InMemoryObjectStore {
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}
