//! src/services/cache_service.rs
//!
//! MediaCacheService: cache-aside orchestration over an `ObjectStore` and
//! any `OriginAdapter`. A hit is served from the store without touching the
//! origin; a miss calls the origin once, writes the complete payload under
//! the key and hands the same bytes back to the caller.
//!
//! Concurrent misses for one key are not coalesced: each caller runs its own
//! origin call and receives the body that call produced, and the store keeps
//! whichever write lands last.

use super::{
    cache_key::CacheKey,
    object_store::{ObjectStore, StoreError},
    origins::OriginAdapter,
};
use crate::{
    errors::CacheError,
    models::media::{ByteStream, DEFAULT_CONTENT_TYPE, MediaBody, MediaObject},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt, channel::mpsc};
use serde_json::Value;
use std::{io, sync::Arc};
use tracing::{debug, info, warn};

/// Chunks buffered per branch of a tee'd stream.
const TEE_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Result of `resolve`: the body plus what is known about it.
#[derive(Debug)]
pub struct Resolved {
    pub key: CacheKey,
    pub body: MediaBody,
    pub content_type: String,
    /// Known for hits and buffered misses; `None` while a tee is streaming.
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub status: CacheStatus,
}

/// Result of a generation or upload flow.
#[derive(Debug, Clone)]
pub struct Generated {
    pub key: CacheKey,
    pub origin_id: String,
    pub content_type: String,
    pub inputs: Value,
    pub size: u64,
}

#[derive(Clone)]
pub struct MediaCacheService {
    store: Arc<dyn ObjectStore>,
}

impl MediaCacheService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Cache-aside read-through for `key`.
    ///
    /// Parameters are validated before the store is read. A write only
    /// happens after the origin payload has been assembled completely.
    pub async fn resolve<A: OriginAdapter>(
        &self,
        adapter: &A,
        key: CacheKey,
        params: A::Params,
    ) -> Result<Resolved, CacheError> {
        adapter.validate(&params)?;

        if let Some(hit) = self.store.get(key.as_str()).await.map_err(read_error)? {
            debug!("cache hit for {}", key);
            return Ok(Resolved {
                key,
                body: hit.body,
                content_type: non_empty_content_type(hit.content_type),
                size: Some(hit.size),
                etag: Some(hit.etag),
                status: CacheStatus::Hit,
            });
        }

        debug!("cache miss for {}", key);
        let payload = adapter.produce(params).await.map_err(|err| {
            warn!("origin call for {} failed: {}", key, err);
            CacheError::from(err)
        })?;
        let content_type = non_empty_content_type(payload.content_type);

        match payload.body {
            MediaBody::Streaming(stream)
                if adapter.supports_streaming_passthrough()
                    && self.store.supports_streaming_writes() =>
            {
                let body = self.tee_into_store(key.clone(), content_type.clone(), stream);
                Ok(Resolved {
                    key,
                    body: MediaBody::Streaming(body),
                    content_type,
                    size: None,
                    etag: None,
                    status: CacheStatus::Miss,
                })
            }
            body => {
                let bytes = body.into_bytes().await.map_err(|err| {
                    warn!("origin stream for {} failed: {}", key, err);
                    CacheError::OriginFetchFailed {
                        status: None,
                        message: format!("origin stream failed: {}", err),
                    }
                })?;
                let record = self
                    .store
                    .put(key.as_str(), bytes.clone(), &content_type)
                    .await
                    .map_err(write_error)?;
                info!("stored {} ({} bytes, {})", key, record.size, content_type);

                Ok(Resolved {
                    key,
                    body: MediaBody::Buffered(bytes),
                    content_type,
                    size: Some(record.size),
                    etag: Some(record.etag),
                    status: CacheStatus::Miss,
                })
            }
        }
    }

    /// Mint a fresh key, produce and store the payload, and report where it
    /// landed. Identical inputs always produce a new object.
    pub async fn generate<A: OriginAdapter>(
        &self,
        adapter: &A,
        params: A::Params,
    ) -> Result<Generated, CacheError> {
        let descriptor = adapter.describe(&params);
        let resolved = self.resolve(adapter, CacheKey::fresh(), params).await?;

        // Draining also waits out a tee'd write before the key is handed out.
        let size = match resolved.size {
            Some(size) => size,
            None => resolved
                .body
                .into_bytes()
                .await
                .map_err(|err| CacheError::StoreWriteFailed(err.to_string()))?
                .len() as u64,
        };

        Ok(Generated {
            key: resolved.key,
            origin_id: descriptor.origin_id,
            content_type: resolved.content_type,
            inputs: descriptor.inputs,
            size,
        })
    }

    /// Retrieval by key. Never falls back to an origin.
    pub async fn fetch(&self, key: &str) -> Result<MediaObject, CacheError> {
        let key = CacheKey::existing(key)?;
        let mut object = self
            .store
            .get(key.as_str())
            .await
            .map_err(read_error)?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        object.content_type = non_empty_content_type(object.content_type);
        Ok(object)
    }

    /// Split `origin` into a branch written to the store and a branch
    /// returned to the caller.
    ///
    /// The caller's branch ends only once the store write has finished. If
    /// the origin fails mid-stream the write is aborted and the error is
    /// forwarded; if the write fails the caller's branch ends with an error.
    /// A caller that goes away does not stop the write.
    fn tee_into_store(&self, key: CacheKey, content_type: String, mut origin: ByteStream) -> ByteStream {
        let (mut client_tx, client_rx) = mpsc::channel::<io::Result<Bytes>>(TEE_BUFFER);
        let (mut store_tx, store_rx) = mpsc::channel::<io::Result<Bytes>>(TEE_BUFFER);

        let writer = {
            let store = self.store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .put_stream(key.as_str(), store_rx.boxed(), &content_type)
                    .await
            })
        };

        tokio::spawn(async move {
            let mut client_open = true;
            let mut origin_failed = false;

            while let Some(item) = origin.next().await {
                match item {
                    Ok(chunk) => {
                        // The writer only hangs up after failing; its error is reported below.
                        if store_tx.send(Ok(chunk.clone())).await.is_err() {
                            break;
                        }
                        if client_open && client_tx.send(Ok(chunk)).await.is_err() {
                            debug!("client left while streaming {}; finishing store write", key);
                            client_open = false;
                        }
                    }
                    Err(err) => {
                        warn!("origin stream for {} failed: {}", key, err);
                        origin_failed = true;
                        let _ = store_tx.send(Err(io::Error::other(err.to_string()))).await;
                        if client_open {
                            let _ = client_tx.send(Err(err)).await;
                        }
                        break;
                    }
                }
            }
            drop(store_tx);

            let failure = match writer.await {
                Ok(Ok(record)) => {
                    info!("stored {} ({} bytes, streamed)", key, record.size);
                    None
                }
                Ok(Err(err)) if origin_failed => {
                    debug!("store write for {} aborted: {}", key, err);
                    None
                }
                Ok(Err(err)) => Some(err.to_string()),
                Err(err) => Some(err.to_string()),
            };
            if let Some(message) = failure {
                warn!("store write for {} failed: {}", key, message);
                if client_open {
                    let _ = client_tx
                        .send(Err(io::Error::other(format!("store write failed: {}", message))))
                        .await;
                }
            }
        });

        client_rx.boxed()
    }
}

fn non_empty_content_type(content_type: String) -> String {
    if content_type.trim().is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        content_type
    }
}

fn read_error(err: StoreError) -> CacheError {
    match err {
        StoreError::InvalidKey(key) => CacheError::Validation(format!("invalid object key `{}`", key)),
        other => CacheError::StoreReadFailed(other.to_string()),
    }
}

fn write_error(err: StoreError) -> CacheError {
    match err {
        StoreError::InvalidKey(key) => CacheError::Validation(format!("invalid object key `{}`", key)),
        other => CacheError::StoreWriteFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::listing::ListingPage,
        models::media::ObjectRecord,
        services::{
            disk_store::{DiskObjectStore, tests::temp_store},
            object_store::{InMemoryObjectStore, ReadinessCheck, StoreResult},
            origins::{
                ClientPayload, ClientSuppliedOrigin, GenerativeModelOrigin, OriginDescriptor,
                OriginError, OriginPayload,
                generative::tests::{StubRunner, request},
            },
        },
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    /// Origin double that counts calls and streams fixed chunks.
    #[derive(Default)]
    struct FakeOrigin {
        calls: AtomicUsize,
        chunks: Vec<&'static str>,
        streaming: bool,
        break_stream: bool,
        fail: bool,
        gate: Option<Arc<Barrier>>,
    }

    impl FakeOrigin {
        fn serving(chunks: &[&'static str]) -> Self {
            Self {
                chunks: chunks.to_vec(),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OriginAdapter for FakeOrigin {
        type Params = String;

        fn validate(&self, locator: &String) -> Result<(), OriginError> {
            if locator.is_empty() {
                return Err(OriginError::Invalid("locator is required".into()));
            }
            Ok(())
        }

        fn describe(&self, locator: &String) -> OriginDescriptor {
            OriginDescriptor {
                origin_id: "fake".into(),
                inputs: json!({ "locator": locator }),
            }
        }

        fn supports_streaming_passthrough(&self) -> bool {
            self.streaming
        }

        async fn produce(&self, _locator: String) -> Result<OriginPayload, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }
            if self.fail {
                return Err(OriginError::Upstream {
                    status: Some(503),
                    message: "Service Unavailable".into(),
                });
            }
            let mut items: Vec<io::Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            if self.break_stream {
                items.push(Err(io::Error::other("connection reset")));
            }
            Ok(OriginPayload {
                body: MediaBody::Streaming(futures::stream::iter(items).boxed()),
                content_type: "video/mp4".into(),
            })
        }
    }

    /// Store wrapper that counts reads.
    struct CountingStore {
        inner: InMemoryObjectStore,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<ObjectRecord> {
            self.inner.put(key, body, content_type).await
        }

        async fn get(&self, key: &str) -> StoreResult<Option<MediaObject>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn list(&self, page_token: Option<&str>) -> StoreResult<ListingPage> {
            self.inner.list(page_token).await
        }

        async fn readiness(&self) -> Vec<ReadinessCheck> {
            self.inner.readiness().await
        }
    }

    fn memory_service() -> (MediaCacheService, InMemoryObjectStore) {
        let store = InMemoryObjectStore::default();
        (MediaCacheService::new(Arc::new(store.clone())), store)
    }

    fn key(segments: &[&str]) -> CacheKey {
        CacheKey::composite("test", segments).unwrap()
    }

    #[tokio::test]
    async fn hit_never_calls_origin() {
        let (service, store) = memory_service();
        store
            .put("test/a", Bytes::from_static(b"cached"), "video/mp4")
            .await
            .unwrap();
        let origin = FakeOrigin::serving(&["fresh"]);

        let resolved = service.resolve(&origin, key(&["a"]), "a".into()).await.unwrap();
        assert_eq!(resolved.status, CacheStatus::Hit);
        assert_eq!(origin.calls(), 0);
        assert_eq!(resolved.body.into_bytes().await.unwrap(), Bytes::from_static(b"cached"));
    }

    #[tokio::test]
    async fn miss_writes_once_and_later_reads_hit() {
        let (service, _store) = memory_service();
        let origin = FakeOrigin::serving(&["ab", "cd"]);

        let first = service.resolve(&origin, key(&["a"]), "a".into()).await.unwrap();
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(first.size, Some(4));
        assert_eq!(first.body.into_bytes().await.unwrap(), Bytes::from_static(b"abcd"));

        let second = service.resolve(&origin, key(&["a"]), "a".into()).await.unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(origin.calls(), 1);

        let stored = service.fetch("test/a").await.unwrap();
        assert_eq!(stored.content_type, "video/mp4");
        assert_eq!(stored.body.into_bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn origin_failure_writes_nothing() {
        let (service, store) = memory_service();
        let origin = FakeOrigin {
            fail: true,
            ..Default::default()
        };

        let err = service.resolve(&origin, key(&["a"]), "a".into()).await.unwrap_err();
        assert!(matches!(err, CacheError::OriginFetchFailed { status: Some(503), .. }));
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn broken_buffered_stream_writes_nothing() {
        let (service, store) = memory_service();
        let origin = FakeOrigin {
            chunks: vec!["ab"],
            break_stream: true,
            ..Default::default()
        };

        let err = service.resolve(&origin, key(&["a"]), "a".into()).await.unwrap_err();
        assert!(matches!(err, CacheError::OriginFetchFailed { status: None, .. }));
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_params_skip_store_and_origin() {
        let store = Arc::new(CountingStore {
            inner: InMemoryObjectStore::default(),
            gets: AtomicUsize::new(0),
        });
        let service = MediaCacheService::new(store.clone());
        let origin = FakeOrigin::serving(&["x"]);

        let err = service.resolve(&origin, key(&["a"]), String::new()).await.unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn fetch_missing_key_is_not_found() {
        let (service, _store) = memory_service();
        let err = service.fetch("missing-key").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn fetch_rejects_unsafe_key() {
        let (service, _store) = memory_service();
        let err = service.fetch("../secrets").await.unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }

    #[tokio::test]
    async fn generated_image_is_decoded_and_stored() {
        let (service, _store) = memory_service();
        let origin =
            GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({ "image": "YWI=" }))));

        let generated = service
            .generate(&origin, request("flux-schnell", "hi"))
            .await
            .unwrap();
        assert_eq!(generated.origin_id, "@cf/black-forest-labs/flux-1-schnell");
        assert_eq!(generated.inputs, json!({ "prompt": "hi" }));

        let stored = service.fetch(generated.key.as_str()).await.unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(&stored.body.into_bytes().await.unwrap()[..], &[0x61, 0x62]);
    }

    #[tokio::test]
    async fn identical_prompts_produce_distinct_objects() {
        let (service, store) = memory_service();
        let origin =
            GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({ "image": "YWI=" }))));

        let a = service.generate(&origin, request("flux-schnell", "hi")).await.unwrap();
        let b = service.generate(&origin, request("flux-schnell", "hi")).await.unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(store.object_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_misses_both_get_whole_bodies() {
        let store = temp_store(10).await;
        let service = MediaCacheService::new(Arc::new(DiskObjectStore::clone(&store)));
        let origin = Arc::new(FakeOrigin {
            chunks: vec!["0123456789", "abcdefghij"],
            gate: Some(Arc::new(Barrier::new(2))),
            ..Default::default()
        });

        let run = |service: MediaCacheService, origin: Arc<FakeOrigin>| async move {
            let resolved = service
                .resolve(origin.as_ref(), key(&["same"]), "same".into())
                .await
                .unwrap();
            resolved.body.into_bytes().await.unwrap()
        };
        let (a, b) = tokio::join!(
            run(service.clone(), origin.clone()),
            run(service.clone(), origin.clone())
        );

        assert_eq!(origin.calls(), 2);
        assert_eq!(a, Bytes::from_static(b"0123456789abcdefghij"));
        assert_eq!(b, a);
        let stored = service.fetch("test/same").await.unwrap();
        assert_eq!(stored.body.into_bytes().await.unwrap(), a);
    }

    #[tokio::test]
    async fn streaming_miss_is_teed_into_store() {
        let store = temp_store(10).await;
        let service = MediaCacheService::new(Arc::new(DiskObjectStore::clone(&store)));
        let origin = FakeOrigin {
            chunks: vec!["chunk-1|", "chunk-2|", "chunk-3"],
            streaming: true,
            ..Default::default()
        };

        let resolved = service.resolve(&origin, key(&["video"]), "video".into()).await.unwrap();
        assert!(matches!(resolved.body, MediaBody::Streaming(_)));
        assert_eq!(resolved.size, None);
        let body = resolved.body.into_bytes().await.unwrap();
        assert_eq!(body, Bytes::from_static(b"chunk-1|chunk-2|chunk-3"));

        let stored = service.fetch("test/video").await.unwrap();
        assert_eq!(stored.size, body.len() as u64);
        assert_eq!(stored.body.into_bytes().await.unwrap(), body);
    }

    #[tokio::test]
    async fn broken_teed_stream_errors_and_writes_nothing() {
        let store = temp_store(10).await;
        let service = MediaCacheService::new(Arc::new(DiskObjectStore::clone(&store)));
        let origin = FakeOrigin {
            chunks: vec!["partial"],
            streaming: true,
            break_stream: true,
            ..Default::default()
        };

        let resolved = service.resolve(&origin, key(&["video"]), "video".into()).await.unwrap();
        assert!(resolved.body.into_bytes().await.is_err());
        assert!(matches!(
            service.fetch("test/video").await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn streaming_origin_is_buffered_for_buffering_store() {
        let (service, store) = memory_service();
        let origin = FakeOrigin {
            chunks: vec!["a", "b"],
            streaming: true,
            ..Default::default()
        };

        let resolved = service.resolve(&origin, key(&["v"]), "v".into()).await.unwrap();
        assert!(matches!(resolved.body, MediaBody::Buffered(_)));
        assert_eq!(store.object_count().await, 1);
    }

    #[tokio::test]
    async fn uploaded_payload_round_trips() {
        let (service, _store) = memory_service();
        let raw: Vec<u8> = (0u8..10).collect();
        let payload = ClientPayload {
            data: Some("AAECAwQFBgcICQ==".into()),
            mime_type: Some("image/png".into()),
        };

        let generated = service
            .generate(&ClientSuppliedOrigin::new(), payload)
            .await
            .unwrap();
        assert_eq!(generated.size, 10);

        let stored = service.fetch(generated.key.as_str()).await.unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.size, 10);
        assert_eq!(&stored.body.into_bytes().await.unwrap()[..], &raw[..]);
    }

    #[tokio::test]
    async fn upload_without_mime_type_is_rejected() {
        let (service, store) = memory_service();
        let payload = ClientPayload {
            data: Some("AAEC".into()),
            mime_type: None,
        };
        let err = service
            .generate(&ClientSuppliedOrigin::new(), payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
        assert_eq!(store.object_count().await, 0);
    }
}
