use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;
use crate::auth::bearer_token;

/// Reject admin calls whose bearer token is not the configured API key.
pub async fn admin_auth_middleware(
    State(state): State<Arc<AdminState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = bearer_token(request.headers());
    let authorized = presented == Some(state.api_key.as_str());
    let token_present = presented.is_some();

    if authorized {
        return Ok(next.run(request).await);
    }

    tracing::warn!(path = %request.uri().path(), token_present, "Rejected admin request");
    Err(StatusCode::UNAUTHORIZED)
}
