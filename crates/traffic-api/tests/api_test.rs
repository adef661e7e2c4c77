//! Router-level tests driven through `tower::ServiceExt::oneshot`, with
//! the in-memory cache and a mock master behind the manager.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::json;
use tower::ServiceExt;

use traffic_api::build_router;
use traffic_cache::MemoryCache;
use traffic_engine::{ServerEntry, TrafficManager};
use traffic_master::{
    MasterError, ProxyConfigWire, ProxyDetailWire, ProxyRecord, ProxyState, Server, TunnelClient,
    TunnelMaster, WorkingStatus,
};

const AUTH_TOKEN: &str = "it-is-a-secret";

/// Echo master: every created proxy immediately reports running with
/// `{subdomain}.example.com` / `0.0.0.0:{remote_port}` addresses.
#[derive(Default)]
struct EchoMaster {
    proxies: Mutex<HashMap<String, (String, String, ProxyDetailWire)>>,
}

#[async_trait]
impl TunnelMaster for EchoMaster {
    async fn list_servers(&self, _keyword: &str) -> Result<Vec<Server>, MasterError> {
        Ok(vec![Server {
            id: "user.s.node1".to_string(),
        }])
    }

    async fn list_clients(&self, _keyword: &str) -> Result<Vec<TunnelClient>, MasterError> {
        Ok(Vec::new())
    }

    async fn create_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        config: &ProxyConfigWire,
        _overwrite: bool,
    ) -> Result<(), MasterError> {
        let mut proxies = self.proxies.lock().unwrap();
        for detail in &config.proxies {
            proxies.insert(
                detail.name.clone(),
                (client_id.to_string(), server_id.to_string(), detail.clone()),
            );
        }
        Ok(())
    }

    async fn list_proxy_configs(&self, keyword: &str) -> Result<Vec<ProxyRecord>, MasterError> {
        Ok(self
            .proxies
            .lock()
            .unwrap()
            .values()
            .filter(|(_, _, detail)| detail.name.starts_with(keyword))
            .map(|(client_id, server_id, detail)| ProxyRecord {
                client_id: client_id.clone(),
                server_id: server_id.clone(),
                name: detail.name.clone(),
            })
            .collect())
    }

    async fn get_proxy_config(
        &self,
        _client_id: &str,
        _server_id: &str,
        name: &str,
    ) -> Result<ProxyState, MasterError> {
        let proxies = self.proxies.lock().unwrap();
        let working_status = proxies.get(name).map(|(_, _, detail)| {
            let remote_addr = match detail.proxy_type.as_str() {
                "http" => format!("{}.example.com", detail.subdomain.clone().unwrap_or_default()),
                _ => format!("0.0.0.0:{}", detail.remote_port.unwrap_or_default()),
            };
            WorkingStatus {
                name: name.to_string(),
                proxy_type: detail.proxy_type.clone(),
                status: "running".to_string(),
                err: String::new(),
                remote_addr,
            }
        });
        Ok(ProxyState {
            proxy_config: None,
            working_status,
        })
    }

    async fn delete_proxy_config(
        &self,
        _client_id: &str,
        _server_id: &str,
        name: &str,
    ) -> Result<(), MasterError> {
        self.proxies.lock().unwrap().remove(name);
        Ok(())
    }
}

fn test_app() -> Router {
    let cache = Arc::new(MemoryCache::new());
    let master = Arc::new(EchoMaster::default());
    let manager = Arc::new(TrafficManager::new(
        cache,
        master,
        "user",
        vec![ServerEntry {
            node_name: "node1".to_string(),
            port_range: (10000, 10009),
            remote_addr: "203.0.113.7".to_string(),
        }],
    ));
    build_router(manager, AUTH_TOKEN)
}

fn traffic_body(traffic: &str) -> serde_json::Value {
    json!({
        "node_name": "node1",
        "service": {
            "traffic": traffic,
            "created_at": Utc::now().timestamp(),
            "lifetime": 3600,
            "ports": [
                {"name": "web", "node_port": 8080, "protocol": "TCP", "app_protocol": "http"}
            ]
        }
    })
}

fn post_traffic(body: String, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/traffic")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ping_answers_without_authentication() {
    let response = test_app()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!("pong"));
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let response = test_app()
        .oneshot(post_traffic(traffic_body("T1").to_string(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let response = test_app()
        .oneshot(post_traffic(traffic_body("T1").to_string(), Some("nope")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_auth_scheme_is_unauthorized() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/traffic")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                .body(Body::from(traffic_body("T1").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let response = test_app()
        .oneshot(post_traffic("{not json".to_string(), Some(AUTH_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schema_violation_is_a_bad_request() {
    // protocol outside the enum
    let body = json!({
        "node_name": "node1",
        "service": {
            "traffic": "T1",
            "created_at": Utc::now().timestamp(),
            "lifetime": 3600,
            "ports": [
                {"name": "web", "node_port": 8080, "protocol": "SCTP", "app_protocol": "raw"}
            ]
        }
    });
    let response = test_app()
        .oneshot(post_traffic(body.to_string(), Some(AUTH_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_returns_the_address_map() {
    let response = test_app()
        .oneshot(post_traffic(traffic_body("T1").to_string(), Some(AUTH_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: BTreeMap<String, String> =
        serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.len(), 1);
    let addr = body.get("web:8080/http").expect("port key present");
    assert!(addr.starts_with("node1-"));
    assert!(addr.ends_with(".example.com"));
}

#[tokio::test]
async fn delete_returns_the_snapshot() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(post_traffic(traffic_body("T1").to_string(), Some(AUTH_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v1/traffic")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {AUTH_TOKEN}"))
                .body(Body::from(json!({"traffic_id": "T1"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["traffic_id"], "T1");
    assert_eq!(body["remote_addr"], created);
}

#[tokio::test]
async fn delete_of_unknown_traffic_reports_no_snapshot() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v1/traffic")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {AUTH_TOKEN}"))
                .body(Body::from(json!({"traffic_id": "missing"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["traffic_id"], "missing");
    assert!(body.get("remote_addr").is_none());
}
