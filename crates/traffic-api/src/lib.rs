//! HTTP surface of the traffic controller
//!
//! `GET /ping` answers unauthenticated; everything under `/v1` sits
//! behind the static bearer token from the configuration. Swagger UI is
//! mounted at `/swagger-ui` and serves the OpenAPI document at
//! `/api/openapi.json`.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use traffic_engine::TrafficManager;

/// State shared across handlers
pub struct AppState {
    pub manager: Arc<TrafficManager>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Traffic Controller API",
        version = "0.1.0",
        description = "Provisions tunnel ingress for orchestrated services"
    ),
    paths(handlers::ping, handlers::update_traffic, handlers::delete_traffic),
    components(schemas(
        models::Protocol,
        models::AppProtocol,
        models::ServiceType,
        models::PortSpec,
        models::ServiceSpec,
        models::UpdateTrafficRequest,
        models::DeleteTrafficRequest,
        models::DeleteTrafficResponse,
    )),
    tags(
        (name = "traffic", description = "Traffic provisioning endpoints"),
        (name = "system", description = "Health endpoints")
    )
)]
struct ApiDoc;

/// Build the router with all routes and middleware
pub fn build_router(manager: Arc<TrafficManager>, auth_token: &str) -> Router {
    let api_doc = ApiDoc::openapi();

    let state = Arc::new(AppState { manager });
    let auth_state = Arc::new(middleware::AuthState::new(auth_token));

    let public_router = Router::new().route("/ping", get(handlers::ping));

    let protected_router = Router::new()
        .route(
            "/v1/traffic",
            post(handlers::update_traffic).delete(handlers::delete_traffic),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::require_auth,
        ));

    // SwaggerUi automatically creates a route for /api/openapi.json
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
        .merge(public_router)
        .merge(protected_router)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_generates() {
        let _doc = ApiDoc::openapi();
    }
}
