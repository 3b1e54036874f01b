//! Pre-shared identity check for the generation routes.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub const AUTH_GUID_HEADER: &str = "x-auth-guid";

/// Rejects requests whose `X-Auth-Guid` header does not match the
/// configured token. Without a configured token every request is rejected.
pub async fn require_auth_guid(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let supplied = request
        .headers()
        .get(AUTH_GUID_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = match (state.auth_guid.as_deref(), supplied) {
        (Some(expected), Some(supplied)) => !supplied.is_empty() && supplied == expected,
        _ => false,
    };
    if !authorized {
        tracing::debug!("rejected {} without a valid auth guid", request.uri().path());
        return Err(AppError::unauthorized());
    }
    Ok(next.run(request).await)
}
