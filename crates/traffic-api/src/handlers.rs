use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::error::ApiError;
use crate::models::{DeleteTrafficRequest, DeleteTrafficResponse, UpdateTrafficRequest};
use crate::AppState;

/// Liveness probe
#[utoipa::path(
    get,
    path = "/ping",
    responses((status = 200, description = "Service is up", body = String)),
    tag = "system"
)]
pub async fn ping() -> Json<&'static str> {
    Json("pong")
}

/// Create or extend the proxies for one service
#[utoipa::path(
    post,
    path = "/v1/traffic",
    request_body = UpdateTrafficRequest,
    responses(
        (status = 200, description = "Public address per port key", body = BTreeMap<String, String>),
        (status = 400, description = "Malformed body"),
        (status = 401, description = "Missing or wrong bearer token"),
        (status = 503, description = "Proxies did not become ready"),
        (status = 500, description = "Provisioning failed")
    ),
    tag = "traffic"
)]
pub async fn update_traffic(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateTrafficRequest>, JsonRejection>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    info!(
        traffic = %request.service.traffic,
        node = %request.node_name,
        ports = request.service.ports.len(),
        "update traffic"
    );
    let remote_addr = state
        .manager
        .update_traffic(&request.node_name, request.service.into())
        .await?;
    Ok(Json(remote_addr))
}

/// Tear down one traffic's proxies and indexes
#[utoipa::path(
    delete,
    path = "/v1/traffic",
    request_body = DeleteTrafficRequest,
    responses(
        (status = 200, description = "Teardown result", body = DeleteTrafficResponse),
        (status = 400, description = "Malformed body"),
        (status = 401, description = "Missing or wrong bearer token"),
        (status = 500, description = "Teardown failed")
    ),
    tag = "traffic"
)]
pub async fn delete_traffic(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeleteTrafficRequest>, JsonRejection>,
) -> Result<Json<DeleteTrafficResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    info!(traffic = %request.traffic_id, "delete traffic");
    let outcome = state.manager.delete_traffic(&request.traffic_id).await?;
    Ok(Json(outcome.into()))
}
