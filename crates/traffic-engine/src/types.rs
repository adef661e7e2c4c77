//! Domain types for services, proxies, and the KV index tables

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use traffic_master::{ProxyConfigWire, ProxyDetailWire};

/// Prefix every proxy name carries on the master
pub const PROXY_NAME_PREFIX: &str = "ret2shell";

/// Address the tunnel client dials on the workload side
pub const LOCAL_PROXY_IP: &str = "127.0.0.1";

/// Transport protocol of a requested port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Stcp,
}

/// Application protocol of a requested port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    Raw,
    Http,
}

/// The proxy type a port normalizes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Tcp,
    Udp,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceType::Http => "http",
            ServiceType::Tcp => "tcp",
            ServiceType::Udp => "udp",
        })
    }
}

/// One requested port of a service, as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub node_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    pub protocol: Protocol,
    pub app_protocol: AppProtocol,
}

/// Caller-supplied description of one traffic's desired ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub traffic: String,
    pub created_at: i64,
    pub lifetime: i64,
    pub ports: Vec<Port>,
}

/// A port after normalization: the service type is always concrete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPort {
    pub name: String,
    pub node_port: u16,
    pub service_type: ServiceType,
    pub protocol: Protocol,
    pub app_protocol: AppProtocol,
}

/// A service after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedService {
    pub traffic: String,
    pub created_at: i64,
    pub lifetime: i64,
    pub ports: Vec<NormalizedPort>,
}

impl NormalizedService {
    /// Deadline after which every index entry of this service expires
    pub fn expire_at(&self) -> i64 {
        self.created_at + self.lifetime
    }
}

impl From<Port> for NormalizedPort {
    fn from(port: Port) -> Self {
        // http dominates the transport protocol; otherwise the proxy
        // type follows the transport (STCP rides the tcp path)
        let service_type = if port.app_protocol == AppProtocol::Http {
            ServiceType::Http
        } else if port.protocol == Protocol::Udp {
            ServiceType::Udp
        } else {
            ServiceType::Tcp
        };
        NormalizedPort {
            name: port.name,
            node_port: port.node_port,
            service_type,
            protocol: port.protocol,
            app_protocol: port.app_protocol,
        }
    }
}

impl From<Service> for NormalizedService {
    fn from(service: Service) -> Self {
        NormalizedService {
            traffic: service.traffic,
            created_at: service.created_at,
            lifetime: service.lifetime,
            ports: service.ports.into_iter().map(NormalizedPort::from).collect(),
        }
    }
}

/// One proxy rule as stored in the `conf` index entry.
///
/// `subdomain` is present iff the proxy is http; `remote_port` iff it is
/// tcp or udp. Field names stay snake_case in storage; the wire shim
/// below converts for the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDetail {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ServiceType,
    pub local_port: u16,
    pub local_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

/// The proxy set of one traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfigDoc {
    pub proxies: Vec<ProxyDetail>,
}

/// Value of `traffic:{traffic_id}:conf`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficConf {
    pub client_id: String,
    pub server_id: String,
    pub config: ProxyConfigDoc,
}

/// Value of `traffic:{traffic_id}:addr`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficAddr {
    pub remote_ports: Vec<u16>,
    pub remote_addr: BTreeMap<String, String>,
}

/// One entry of the `working:{traffic_id}` list: a proxy that was
/// actually created on the master, the ground truth for deprovisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingProxy {
    pub client_id: String,
    pub server_id: String,
    pub name: String,
}

/// One locally configured tunnel server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerEntry {
    pub node_name: String,
    /// Inclusive range remote ports are drawn from
    pub port_range: (u16, u16),
    /// Public address tcp/udp ingress is reported under
    pub remote_addr: String,
}

impl From<&ProxyDetail> for ProxyDetailWire {
    fn from(detail: &ProxyDetail) -> Self {
        ProxyDetailWire {
            name: detail.name.clone(),
            proxy_type: detail.proxy_type.to_string(),
            local_port: detail.local_port,
            local_ip: detail.local_ip.clone(),
            subdomain: detail.subdomain.clone(),
            remote_port: detail.remote_port,
        }
    }
}

impl From<&ProxyConfigDoc> for ProxyConfigWire {
    fn from(config: &ProxyConfigDoc) -> Self {
        ProxyConfigWire {
            proxies: config.proxies.iter().map(Into::into).collect(),
        }
    }
}

/// Full proxy name for one normalized port. The last two colon-separated
/// segments form the port key, so the prefix and the traffic id may
/// themselves contain colons.
pub fn proxy_name(traffic_id: &str, port: &NormalizedPort) -> String {
    format!(
        "{PROXY_NAME_PREFIX}:{traffic_id}:{}:{}/{}",
        port.name, port.node_port, port.service_type
    )
}

/// Stable map key a public address is returned under:
/// `{name}:{node_port}/{service_type}`, recovered as the last two
/// `:`-segments of the proxy name.
pub fn port_key(proxy_name: &str) -> String {
    let mut segments = proxy_name.rsplitn(3, ':');
    let tail = segments.next().unwrap_or_default();
    match segments.next() {
        Some(head) => format!("{head}:{tail}"),
        None => tail.to_string(),
    }
}

/// DNS-label-safe rendering of a node name: lowercase, everything
/// outside `[a-z0-9-]` replaced by `-`, outer dashes trimmed
pub fn sanitize_subdomain(node_name: &str) -> String {
    let mapped: String = node_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

const SUBDOMAIN_ID_LEN: usize = 21;
const SUBDOMAIN_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Subdomain assigned to an http proxy: the sanitized node name plus a
/// 21-character lowercase alphanumeric id
pub fn subdomain_for(node_name: &str) -> String {
    let mut rng = rand::thread_rng();
    let id: String = (0..SUBDOMAIN_ID_LEN)
        .map(|_| SUBDOMAIN_ID_ALPHABET[rng.gen_range(0..SUBDOMAIN_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", sanitize_subdomain(node_name), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(protocol: Protocol, app_protocol: AppProtocol) -> Port {
        Port {
            name: "web".to_string(),
            node_port: 8080,
            service_type: None,
            protocol,
            app_protocol,
        }
    }

    #[test]
    fn normalization_is_total_and_http_dominates() {
        let cases = [
            (Protocol::Tcp, AppProtocol::Http, ServiceType::Http),
            (Protocol::Udp, AppProtocol::Http, ServiceType::Http),
            (Protocol::Stcp, AppProtocol::Http, ServiceType::Http),
            (Protocol::Tcp, AppProtocol::Raw, ServiceType::Tcp),
            (Protocol::Stcp, AppProtocol::Raw, ServiceType::Tcp),
            (Protocol::Udp, AppProtocol::Raw, ServiceType::Udp),
        ];
        for (protocol, app_protocol, expected) in cases {
            let normalized = NormalizedPort::from(port(protocol, app_protocol));
            assert_eq!(normalized.service_type, expected);
        }
    }

    #[test]
    fn service_schema_matches_the_caller_wire() {
        let service: Service = serde_json::from_str(
            r#"{
                "traffic": "T1",
                "created_at": 1700000000,
                "lifetime": 3600,
                "ports": [
                    {"name": "web", "node_port": 8080, "protocol": "TCP", "app_protocol": "http"},
                    {"name": "game", "node_port": 27015, "protocol": "UDP", "app_protocol": "raw"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(service.ports.len(), 2);
        assert_eq!(service.ports[0].app_protocol, AppProtocol::Http);
        assert_eq!(service.ports[1].protocol, Protocol::Udp);

        let bad: Result<Service, _> = serde_json::from_str(
            r#"{"traffic": "T1", "created_at": 0, "lifetime": 0,
                "ports": [{"name": "x", "node_port": 1, "protocol": "SCTP", "app_protocol": "raw"}]}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn proxy_name_round_trips_through_port_key() {
        let normalized = NormalizedPort::from(port(Protocol::Tcp, AppProtocol::Http));
        let name = proxy_name("T1", &normalized);
        assert_eq!(name, "ret2shell:T1:web:8080/http");
        assert_eq!(port_key(&name), "web:8080/http");
    }

    #[test]
    fn port_key_ignores_colons_in_the_prefix() {
        assert_eq!(port_key("pre:fix:with:colons:ctrl:2222/tcp"), "ctrl:2222/tcp");
        assert_eq!(port_key("short"), "short");
    }

    #[test]
    fn subdomains_are_sanitized_and_random() {
        assert_eq!(sanitize_subdomain("Node_1.example"), "node-1-example");
        assert_eq!(sanitize_subdomain("--weird--"), "weird");

        let a = subdomain_for("node1");
        let b = subdomain_for("node1");
        assert_ne!(a, b);
        assert!(a.starts_with("node1-"));
        let id = a.strip_prefix("node1-").unwrap();
        assert_eq!(id.len(), 21);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn proxy_detail_storage_stays_snake_case() {
        let detail = ProxyDetail {
            name: "ret2shell:T1:ctrl:2222/tcp".to_string(),
            proxy_type: ServiceType::Tcp,
            local_port: 2222,
            local_ip: LOCAL_PROXY_IP.to_string(),
            subdomain: None,
            remote_port: Some(10000),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["type"], "tcp");
        assert_eq!(json["local_port"], 2222);
        assert_eq!(json["remote_port"], 10000);

        let wire = ProxyDetailWire::from(&detail);
        assert_eq!(serde_json::to_value(&wire).unwrap()["remotePort"], 10000);
    }
}
