//! Represents a media object as it moves between origins, the store and clients.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{fmt, io};

/// Content type surfaced when neither the origin nor the store supplies one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A live byte stream, as produced by a remote origin or read back from disk.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Payload of a media object, either fully buffered or still streaming.
pub enum MediaBody {
    Buffered(Bytes),
    Streaming(ByteStream),
}

impl MediaBody {
    /// Drain the body into one contiguous buffer.
    ///
    /// Any error yielded by the stream aborts the drain; a partial buffer is
    /// never returned.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            MediaBody::Buffered(bytes) => Ok(bytes),
            MediaBody::Streaming(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Turn the body into an HTTP response body without buffering streams.
    pub fn into_http_body(self) -> Body {
        match self {
            MediaBody::Buffered(bytes) => Body::from(bytes),
            MediaBody::Streaming(stream) => Body::from_stream(stream),
        }
    }
}

impl fmt::Debug for MediaBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaBody::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            MediaBody::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// A stored media object read back from the store.
///
/// `size`, `etag` and `uploaded_at` are populated by the store on write; the
/// cache engine never computes them.
#[derive(Debug)]
pub struct MediaObject {
    /// Stored bytes.
    pub body: MediaBody,

    /// MIME type, never empty.
    pub content_type: String,

    /// Size in bytes.
    pub size: u64,

    /// Hex MD5 of the body.
    pub etag: String,

    /// When the object was written.
    pub uploaded_at: DateTime<Utc>,
}

/// Metadata for a stored object, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub uploaded_at: DateTime<Utc>,
    pub content_type: Option<String>,
}
