//! Wire DTOs for the master API
//!
//! Field names on the wire are lowerCamelCase; the serde renames here
//! are the only case-conversion shim in the repository for this
//! direction.

use serde::{Deserialize, Serialize};

/// A tunnel server registered with the master
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
}

/// A tunnel client registered with the master
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelClient {
    pub id: String,
}

/// One proxy configuration as reported by `proxy/list_configs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRecord {
    pub client_id: String,
    pub server_id: String,
    pub name: String,
}

/// One proxy rule inside the base64(JSON) config envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDetailWire {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub local_port: u16,
    pub local_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

/// Payload that gets base64-wrapped into `create_config`'s `config`
/// field. The master expects base64(JSON(payload)) even though the
/// envelope is itself JSON; do not flatten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfigWire {
    pub proxies: Vec<ProxyDetailWire>,
}

/// Live status of one proxy as reported by `proxy/get_config`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingStatus {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub proxy_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub remote_addr: String,
}

/// `proxy/get_config` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyState {
    #[serde(default)]
    pub proxy_config: Option<serde_json::Value>,
    #[serde(default)]
    pub working_status: Option<WorkingStatus>,
}

impl ProxyState {
    /// A proxy counts as running only when the master reports a working
    /// status of exactly `"running"`.
    pub fn is_running(&self) -> bool {
        self.working_status
            .as_ref()
            .is_some_and(|ws| ws.status == "running")
    }

    pub fn reported_addr(&self) -> Option<&str> {
        self.working_status
            .as_ref()
            .map(|ws| ws.remote_addr.as_str())
            .filter(|addr| !addr.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_detail_serializes_to_camel_case() {
        let detail = ProxyDetailWire {
            name: "ret2shell:T1:ctrl:2222/tcp".to_string(),
            proxy_type: "tcp".to_string(),
            local_port: 2222,
            local_ip: "127.0.0.1".to_string(),
            subdomain: None,
            remote_port: Some(10000),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["type"], "tcp");
        assert_eq!(json["localPort"], 2222);
        assert_eq!(json["localIp"], "127.0.0.1");
        assert_eq!(json["remotePort"], 10000);
        assert!(json.get("subdomain").is_none());
    }

    #[test]
    fn working_status_parses_master_fields() {
        let state: ProxyState = serde_json::from_str(
            r#"{
                "proxyConfig": {},
                "workingStatus": {
                    "name": "ret2shell:T1:web:8080/http",
                    "type": "http",
                    "status": "running",
                    "err": "",
                    "remoteAddr": "web.example.com"
                }
            }"#,
        )
        .unwrap();
        assert!(state.is_running());
        assert_eq!(state.reported_addr(), Some("web.example.com"));
    }

    #[test]
    fn missing_working_status_is_not_running() {
        let state: ProxyState = serde_json::from_str(r#"{"proxyConfig": {}}"#).unwrap();
        assert!(!state.is_running());
        assert_eq!(state.reported_addr(), None);
    }
}
