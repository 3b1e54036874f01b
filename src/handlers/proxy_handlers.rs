//! Cache-aside proxy handlers for remote file hosts.
//!
//! The first request for a resource streams it from upstream while it is
//! written to the store; every later request is served from the store.

use super::media_handlers::{X_CACHE, set_content_headers, set_etag};
use crate::{
    errors::AppError,
    services::{cache_service::Resolved, origins::RemoteSource},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::Response,
};

/// `GET /api/gemini/veo/{video_id}/{api_key}` (and `.../video.mp4`)
pub async fn gemini_veo(
    State(state): State<AppState>,
    Path((video_id, api_key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    proxy(&state, RemoteSource::GeminiVeo { video_id, api_key }).await
}

/// `GET /api/replicate/replicate/{key1}/{key2}/{key3}`
pub async fn replicate(
    State(state): State<AppState>,
    Path((key1, key2, key3)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    proxy(&state, RemoteSource::Replicate { key1, key2, key3 }).await
}

async fn proxy(state: &AppState, source: RemoteSource) -> Result<Response, AppError> {
    let key = source.cache_key()?;
    let resolved = state.cache.resolve(&state.remote, key, source).await?;
    Ok(media_response(resolved))
}

fn media_response(resolved: Resolved) -> Response {
    let Resolved {
        body,
        content_type,
        size,
        etag,
        status,
        ..
    } = resolved;

    let mut response = Response::new(body.into_http_body());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_content_headers(headers, &content_type, size);
    if let Some(etag) = etag.as_deref() {
        set_etag(headers, etag);
    }
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
    response
}
