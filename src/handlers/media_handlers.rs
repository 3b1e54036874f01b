//! Retrieval-by-key and listing handlers.
//! Stored bodies are streamed straight from the store.

use crate::{errors::AppError, models::listing::MediaListing, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

/// Objects are immutable once written, so clients may cache them for a year.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000";

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// `GET /`
pub async fn index() -> &'static str {
    "Asset Cache Proxy is running!"
}

/// `GET /api/{kind}/{id}`: stored bytes with their HTTP metadata.
///
/// Never regenerates: an unknown id is a 404.
pub async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let object = state.cache.fetch(&id).await?;

    let mut response = Response::new(object.body.into_http_body());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_content_headers(headers, &object.content_type, Some(object.size));
    set_etag(headers, &object.etag);
    headers.insert(header::LAST_MODIFIED, http_date(&object.uploaded_at));

    Ok(response)
}

/// `GET /api/media`: every stored object with its public URL.
pub async fn list_media(
    State(state): State<AppState>,
) -> Result<Json<Vec<MediaListing>>, AppError> {
    let listings = state.lister.list_all().await?;
    Ok(Json(listings))
}

/// Fallback for unmatched routes.
pub async fn not_found(uri: axum::http::Uri) -> Response {
    if uri.path().starts_with("/api/gemini/veo/") {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid route. Use /veo/:videoid/:apikey or /veo/:videoid/:apikey/video.mp4",
        )
            .into_response();
    }
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

pub(crate) fn set_content_headers(headers: &mut HeaderMap, content_type: &str, size: Option<u64>) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(size) = size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
}

pub(crate) fn set_etag(headers: &mut HeaderMap, etag: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
        headers.insert(header::ETAG, value);
    }
}

fn http_date(at: &DateTime<Utc>) -> HeaderValue {
    HeaderValue::from_str(&at.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}
