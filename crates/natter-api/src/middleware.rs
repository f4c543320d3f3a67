use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use natter_core::CoreError;
use natter_core::identity::bearer_token;

use crate::AppState;
use crate::error::ApiError;

/// Bearer token from the `Authorization` header, if one is present.
pub fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
}

/// Extract and validate the JWT from the Authorization header. On success the
/// verified [`Claims`](natter_types::api::Claims) are available to handlers
/// as an `Extension`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = header_token(req.headers())
        .ok_or_else(|| CoreError::Unauthorized("Missing bearer token".into()))?;

    let claims = state.services.identity.verify(token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
