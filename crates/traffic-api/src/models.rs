//! Request and response bodies of the caller-facing API
//!
//! These mirror the engine's domain types so the HTTP schema stays a
//! documented, stable contract; conversions into engine types happen in
//! the handlers. Caller-facing JSON is snake_case throughout.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use traffic_engine::DeleteOutcome;

/// Transport protocol of a requested port
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Stcp,
}

/// Application protocol of a requested port
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    Raw,
    Http,
}

/// Concrete proxy type a port may request explicitly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Tcp,
    Udp,
}

/// One port of a service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PortSpec {
    /// Port name, unique within the service
    pub name: String,
    /// Port exposed on the workload side
    pub node_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    pub protocol: Protocol,
    pub app_protocol: AppProtocol,
}

/// Description of one traffic's desired ports and lifetime
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceSpec {
    /// Opaque traffic identifier
    pub traffic: String,
    /// Unix seconds
    pub created_at: i64,
    /// Seconds from `created_at` until the service expires
    pub lifetime: i64,
    pub ports: Vec<PortSpec>,
}

/// `POST /v1/traffic` body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateTrafficRequest {
    /// Workload node the tunnel client runs on
    pub node_name: String,
    pub service: ServiceSpec,
}

/// `DELETE /v1/traffic` body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteTrafficRequest {
    pub traffic_id: String,
}

/// `DELETE /v1/traffic` response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteTrafficResponse {
    pub traffic_id: String,
    /// Address snapshot the traffic held, when one existed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<std::collections::BTreeMap<String, String>>,
}

impl From<Protocol> for traffic_engine::Protocol {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => traffic_engine::Protocol::Tcp,
            Protocol::Udp => traffic_engine::Protocol::Udp,
            Protocol::Stcp => traffic_engine::Protocol::Stcp,
        }
    }
}

impl From<AppProtocol> for traffic_engine::AppProtocol {
    fn from(app_protocol: AppProtocol) -> Self {
        match app_protocol {
            AppProtocol::Raw => traffic_engine::AppProtocol::Raw,
            AppProtocol::Http => traffic_engine::AppProtocol::Http,
        }
    }
}

impl From<ServiceType> for traffic_engine::ServiceType {
    fn from(service_type: ServiceType) -> Self {
        match service_type {
            ServiceType::Http => traffic_engine::ServiceType::Http,
            ServiceType::Tcp => traffic_engine::ServiceType::Tcp,
            ServiceType::Udp => traffic_engine::ServiceType::Udp,
        }
    }
}

impl From<PortSpec> for traffic_engine::Port {
    fn from(port: PortSpec) -> Self {
        traffic_engine::Port {
            name: port.name,
            node_port: port.node_port,
            service_type: port.service_type.map(Into::into),
            protocol: port.protocol.into(),
            app_protocol: port.app_protocol.into(),
        }
    }
}

impl From<ServiceSpec> for traffic_engine::Service {
    fn from(service: ServiceSpec) -> Self {
        traffic_engine::Service {
            traffic: service.traffic,
            created_at: service.created_at,
            lifetime: service.lifetime,
            ports: service.ports.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<DeleteOutcome> for DeleteTrafficResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        DeleteTrafficResponse {
            traffic_id: outcome.traffic_id,
            remote_addr: outcome.remote_addr,
        }
    }
}
