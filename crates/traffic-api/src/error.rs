//! Error-to-response mapping for the HTTP surface
//!
//! Every failure renders as a plain-text body carrying the error kind's
//! message, with the status from the engine's taxonomy: readiness
//! timeouts map to 503, schema and body failures to 400, bearer
//! mismatches to 401, everything else to 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use traffic_engine::TrafficError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(&'static str),
    Traffic(TrafficError),
}

impl From<TrafficError> for ApiError {
    fn from(err: TrafficError) -> Self {
        ApiError::Traffic(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message.to_string()),
            ApiError::Traffic(err) => {
                let status = match &err {
                    TrafficError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };
        if status.is_server_error() {
            error!(%status, message, "request failed");
        } else {
            warn!(%status, message, "request rejected");
        }
        (status, message).into_response()
    }
}
