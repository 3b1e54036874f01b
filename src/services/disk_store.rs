//! src/services/disk_store.rs
//!
//! DiskObjectStore: the durable `ObjectStore` backend. Object metadata lives
//! in SQLite; payloads live on local disk sharded beneath
//! `base_path/{shard}/{shard}/{key}`. Payloads are streamed into a temporary
//! file, fsynced and renamed before the metadata row is upserted, so a reader
//! never sees a partially written object.

use super::object_store::{ObjectStore, ReadinessCheck, StoreError, StoreResult, ensure_key_safe};
use crate::models::{
    listing::ListingPage,
    media::{ByteStream, MediaBody, MediaObject, ObjectRecord},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use sqlx::{FromRow, SqlitePool};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Schema applied by `--migrate` and by tests.
pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Metadata row as stored in the `objects` table.
#[derive(Debug, Clone, FromRow)]
struct ObjectRow {
    key: String,
    content_type: String,
    size_bytes: i64,
    etag: String,
    uploaded_at: DateTime<Utc>,
}

impl From<ObjectRow> for ObjectRecord {
    fn from(row: ObjectRow) -> Self {
        ObjectRecord {
            key: row.key,
            size: row.size_bytes.max(0) as u64,
            etag: row.etag,
            uploaded_at: row.uploaded_at,
            content_type: Some(row.content_type).filter(|ct| !ct.is_empty()),
        }
    }
}

#[derive(Clone)]
pub struct DiskObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Maximum records returned by one `list` call.
    pub page_size: usize,
}

impl DiskObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            page_size: page_size.clamp(1, 1000),
        }
    }

    /// Apply the embedded schema statement by statement.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_row(&self, key: &str) -> StoreResult<Option<ObjectRow>> {
        let row = sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, size_bytes, etag, uploaded_at
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Stream `stream` into a temp file next to the final path, then rename.
    ///
    /// Returns the final path, size and hex MD5. The temp file is removed on
    /// any error, including an error item yielded by the stream.
    async fn write_payload(
        &self,
        key: &str,
        mut stream: ByteStream,
    ) -> StoreResult<(PathBuf, i64, String)> {
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        Ok((file_path, size_bytes, format!("{:x}", digest.compute())))
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<ObjectRecord> {
        let stream: ByteStream = futures::stream::once(async move { Ok(body) }).boxed();
        self.put_stream(key, stream, content_type).await
    }

    /// Stream-upload an object to disk and upsert its metadata row.
    ///
    /// Last write wins when two writers race on one key; each writer renames
    /// its own complete temp file so the payload is never interleaved.
    async fn put_stream(
        &self,
        key: &str,
        stream: ByteStream,
        content_type: &str,
    ) -> StoreResult<ObjectRecord> {
        ensure_key_safe(key)?;
        let (file_path, size_bytes, etag) = self.write_payload(key, stream).await?;
        let uploaded_at = Utc::now();

        let insert_result = sqlx::query_as::<_, ObjectRow>(
            r#"
            INSERT INTO objects (key, content_type, size_bytes, etag, uploaded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at
            RETURNING key, content_type, size_bytes, etag, uploaded_at
            "#,
        )
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(uploaded_at)
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(row) => {
                debug!("stored {} ({} bytes) at {}", key, size_bytes, file_path.display());
                Ok(row.into())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    fn supports_streaming_writes(&self) -> bool {
        true
    }

    /// Returns metadata and the payload as a file-backed stream.
    ///
    /// A metadata row whose payload file is missing reads as absent.
    async fn get(&self, key: &str) -> StoreResult<Option<MediaObject>> {
        ensure_key_safe(key)?;
        let Some(row) = self.fetch_row(key).await? else {
            return Ok(None);
        };

        let file = match File::open(self.object_path(key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("metadata for {} present but payload missing", key);
                return Ok(None);
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        Ok(Some(MediaObject {
            body: MediaBody::Streaming(ReaderStream::new(file).boxed()),
            content_type: row.content_type,
            size: row.size_bytes.max(0) as u64,
            etag: row.etag,
            uploaded_at: row.uploaded_at,
        }))
    }

    /// One page in lexicographic key order.
    ///
    /// The continuation token is the base64 of the last key returned, and
    /// the next page starts strictly after it.
    async fn list(&self, page_token: Option<&str>) -> StoreResult<ListingPage> {
        let after = page_token.map(decode_page_token).transpose()?;
        let fetch_limit = self.page_size + 1;

        let mut rows: Vec<ObjectRow> = match &after {
            Some(after) => {
                sqlx::query_as::<_, ObjectRow>(
                    "SELECT key, content_type, size_bytes, etag, uploaded_at
                     FROM objects WHERE key > ? ORDER BY key ASC LIMIT ?",
                )
                .bind(after)
                .bind(fetch_limit as i64)
                .fetch_all(&*self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, ObjectRow>(
                    "SELECT key, content_type, size_bytes, etag, uploaded_at
                     FROM objects ORDER BY key ASC LIMIT ?",
                )
                .bind(fetch_limit as i64)
                .fetch_all(&*self.db)
                .await?
            }
        };

        let truncated = rows.len() == fetch_limit;
        if truncated {
            rows.truncate(self.page_size);
        }
        let next_page_token = if truncated {
            rows.last().map(|row| encode_page_token(&row.key))
        } else {
            None
        };

        Ok(ListingPage {
            records: rows.into_iter().map(ObjectRecord::from).collect(),
            truncated,
            next_page_token,
        })
    }

    /// 1. Runs a lightweight query against SQLite (`SELECT 1`).
    /// 2. Performs a best-effort write/read/delete against `base_path`.
    async fn readiness(&self) -> Vec<ReadinessCheck> {
        let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => ReadinessCheck::ok("sqlite"),
            Ok(v) => ReadinessCheck::failed("sqlite", format!("unexpected result: {}", v)),
            Err(e) => ReadinessCheck::failed("sqlite", format!("error: {}", e)),
        };

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let disk = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => {
                let read = fs::read(&tmp_path).await;
                let _ = fs::remove_file(&tmp_path).await;
                match read {
                    Ok(bytes) if bytes == b"readyz" => ReadinessCheck::ok("disk"),
                    Ok(_) => ReadinessCheck::failed("disk", "file content mismatch"),
                    Err(e) => ReadinessCheck::failed("disk", format!("could not read tmp file: {}", e)),
                }
            }
            Err(e) => ReadinessCheck::failed("disk", format!("could not write tmp file: {}", e)),
        };

        vec![sqlite, disk]
    }
}

fn encode_page_token(key: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(key)
}

fn decode_page_token(token: &str) -> StoreResult<String> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(StoreError::InvalidPageToken)
}
