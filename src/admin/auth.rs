use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AppState;

/// Require `Authorization: Bearer <api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token == &*state.api_key => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
