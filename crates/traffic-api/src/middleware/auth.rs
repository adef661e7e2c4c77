//! Bearer Token Authentication Middleware
//!
//! Guards the `/v1` routes with the single static token from the
//! configuration. Tokens are transmitted in the Authorization header:
//!
//! ```text
//! Authorization: Bearer <token>
//! ```

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::ApiError;

/// Token the middleware validates against
#[derive(Clone)]
pub struct AuthState {
    token: String,
}

impl AuthState {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

/// Reject any request whose Authorization header does not carry the
/// configured bearer token.
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized("missing Authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized(
            "invalid Authorization header, expected 'Bearer <token>'",
        ))?;

    if token.trim() != state.token {
        debug!("bearer auth: token mismatch");
        return Err(ApiError::Unauthorized("invalid bearer token"));
    }

    Ok(next.run(request).await)
}
