//! Route table for the media cache proxy.
//!
//! ## Structure
//! - **Proxy endpoints** (cache-aside, deterministic keys)
//!   - `GET  /api/gemini/veo/{video_id}/{api_key}[/video.mp4]`
//!   - `GET  /api/replicate/replicate/{key1}/{key2}/{key3}`
//!
//! - **Generation endpoints** (fresh key per request)
//!   - `POST /api/cf/text-to-image` and `GET /api/cf/text-to-image/{image_id}`,
//!     both behind the `X-Auth-Guid` check
//!   - `POST /api/cf/text-to-speech` and `GET /api/cf/text-to-speech/{audio_id}`
//!   - `POST /api/upload` and `GET /api/upload/{asset_id}`
//!
//! - **Listing**: `GET /api/media`
//!
//! Anything else falls through to `not_found`.

use crate::{
    handlers::{
        auth::require_auth_guid,
        generation_handlers::{text_to_image, text_to_speech, upload},
        health_handlers::{healthz, readyz},
        media_handlers::{get_media, index, list_media, not_found},
        proxy_handlers::{gemini_veo, replicate},
    },
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{get, post},
};

/// Build the full application router around `state`.
///
/// The auth middleware needs the state at construction time, so unlike a
/// bare `Router<AppState>` this returns a router that is ready to serve.
pub fn routes(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/api/cf/text-to-image", post(text_to_image))
        .route("/api/cf/text-to-image/{image_id}", get(get_media))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth_guid,
        ));

    Router::new()
        .route("/", get(index))
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // proxies
        .route("/api/gemini/veo/{video_id}/{api_key}", get(gemini_veo))
        .route(
            "/api/gemini/veo/{video_id}/{api_key}/video.mp4",
            get(gemini_veo),
        )
        .route(
            "/api/replicate/replicate/{key1}/{key2}/{key3}",
            get(replicate),
        )
        // generation
        .merge(guarded)
        .route("/api/cf/text-to-speech", post(text_to_speech))
        .route("/api/cf/text-to-speech/{audio_id}", get(get_media))
        .route("/api/upload", post(upload))
        .route("/api/upload/{asset_id}", get(get_media))
        // listing
        .route("/api/media", get(list_media))
        .fallback(not_found)
        .with_state(state)
}
