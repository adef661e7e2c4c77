//! Production `TunnelMaster` implementation over HTTPS
//!
//! Authentication: every RPC carries `Authorization: Bearer {token}`.
//! The token is cached in the shared KV under `token:{username}` so that
//! concurrent controller replicas reuse one login session. A token is
//! refreshed when the master answers `{code:500,msg:"token invalid"}`,
//! and opportunistically whenever a response carries an
//! `X-Set-Authorization` header or a `frp-panel-cookie` cookie.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use traffic_cache::{try_parse_json, Cache, CacheKey};

use crate::types::{
    ProxyConfigWire, ProxyRecord, ProxyState, Server, TunnelClient,
};
use crate::{MasterError, TunnelMaster};

/// TTL for the cached master token
const TOKEN_TTL_SECONDS: i64 = 84_600;

/// Page size used for the list RPCs; deployments sit far below this.
const LIST_PAGE_SIZE: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MasterClient {
    http: reqwest::Client,
    api_base: String,
    username: String,
    password: String,
    cache: Arc<dyn Cache>,
}

// ── Request / response envelopes ───────────────────────────────────────

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageRequest<'a> {
    page: u32,
    page_size: u32,
    keyword: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProxyConfigRequest<'a> {
    client_id: &'a str,
    server_id: &'a str,
    /// base64(JSON({proxies: [...]})), preserved exactly as the master
    /// expects it
    config: String,
    overwrite: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRefRequest<'a> {
    client_id: &'a str,
    server_id: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListServersResponse {
    #[serde(default)]
    servers: Vec<Server>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListClientsResponse {
    #[serde(default)]
    clients: Vec<TunnelClient>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListProxyConfigsResponse {
    #[serde(default)]
    proxy_configs: Vec<ProxyRecord>,
}

/// Minimal probe for the master's error envelope
#[derive(Deserialize)]
struct ErrorProbe {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

enum Outcome {
    Ok(String),
    TokenInvalid,
}

impl MasterClient {
    pub fn new(
        api_base: &str,
        username: &str,
        password: &str,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, MasterError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            cache,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn token_key(&self) -> String {
        CacheKey::new().push("token").push(&self.username).to_string()
    }

    async fn store_token(&self, token: &str) -> Result<(), MasterError> {
        self.cache
            .set(&self.token_key(), token, Some(TOKEN_TTL_SECONDS))
            .await?;
        Ok(())
    }

    /// Current bearer token, logging in if none is cached.
    async fn bearer(&self) -> Result<String, MasterError> {
        if let Some(token) = self.cache.get(&self.token_key()).await? {
            return Ok(token);
        }
        self.login().await
    }

    /// Authenticate against the master and cache the fresh token.
    async fn login(&self) -> Result<String, MasterError> {
        let resp = self
            .http
            .post(self.url("v1/auth/login"))
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        let header_token = refreshed_token(resp.headers());
        let text = resp.text().await?;
        let body_token = try_parse_json::<LoginResponse>(&text).and_then(|r| r.token);
        let token = body_token
            .or(header_token)
            .filter(|t| !t.is_empty())
            .ok_or(MasterError::MissingToken)?;
        self.store_token(&token).await?;
        debug!("master login succeeded for {}", self.username);
        Ok(token)
    }

    /// Issue one authenticated RPC, refreshing the token and retrying a
    /// single time when the master reports it invalid. Returns the raw
    /// response body.
    async fn call<B: Serialize>(&self, path: &str, body: &B) -> Result<String, MasterError> {
        let token = self.bearer().await?;
        match self.call_once(path, body, &token).await? {
            Outcome::Ok(text) => Ok(text),
            Outcome::TokenInvalid => {
                debug!("master token invalid, re-authenticating");
                let token = self.login().await?;
                match self.call_once(path, body, &token).await? {
                    Outcome::Ok(text) => Ok(text),
                    Outcome::TokenInvalid => Err(MasterError::Api {
                        code: 500,
                        msg: "token invalid".to_string(),
                    }),
                }
            }
        }
    }

    async fn call_once<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        token: &str,
    ) -> Result<Outcome, MasterError> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        if let Some(fresh) = refreshed_token(resp.headers()) {
            self.store_token(&fresh).await?;
        }
        let status = resp.status();
        let text = resp.text().await?;

        if let Some(probe) = try_parse_json::<ErrorProbe>(&text) {
            if probe.code == Some(500) && probe.msg.as_deref() == Some("token invalid") {
                return Ok(Outcome::TokenInvalid);
            }
        }
        if !status.is_success() {
            return Err(MasterError::Api {
                code: i64::from(status.as_u16()),
                msg: snippet(&text),
            });
        }
        Ok(Outcome::Ok(text))
    }

    /// RPC whose response body the caller cares about.
    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, MasterError> {
        let text = self.call(path, body).await?;
        try_parse_json::<T>(&text).ok_or_else(|| MasterError::Decode(snippet(&text)))
    }

    /// RPC acknowledged by status alone; the body may be empty.
    async fn post_ack<B: Serialize>(&self, path: &str, body: &B) -> Result<(), MasterError> {
        self.call(path, body).await.map(|_| ())
    }
}

/// Token handed back out-of-band on an arbitrary response: the
/// `X-Set-Authorization` header wins, then a `frp-panel-cookie` cookie.
fn refreshed_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get("x-set-authorization")
        .and_then(|v| v.to_str().ok())
    {
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    for cookie in headers.get_all(SET_COOKIE) {
        let Ok(cookie) = cookie.to_str() else { continue };
        let Some(pair) = cookie.split(';').next() else { continue };
        if let Some(token) = pair.trim().strip_prefix("frp-panel-cookie=") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

fn snippet(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        let mut end = LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

#[async_trait]
impl TunnelMaster for MasterClient {
    async fn list_servers(&self, keyword: &str) -> Result<Vec<Server>, MasterError> {
        let resp: ListServersResponse = self
            .post(
                "v1/server/list",
                &PageRequest {
                    page: 1,
                    page_size: LIST_PAGE_SIZE,
                    keyword,
                },
            )
            .await?;
        Ok(resp.servers)
    }

    async fn list_clients(&self, keyword: &str) -> Result<Vec<TunnelClient>, MasterError> {
        let resp: ListClientsResponse = self
            .post(
                "v1/client/list",
                &PageRequest {
                    page: 1,
                    page_size: LIST_PAGE_SIZE,
                    keyword,
                },
            )
            .await?;
        Ok(resp.clients)
    }

    async fn create_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        config: &ProxyConfigWire,
        overwrite: bool,
    ) -> Result<(), MasterError> {
        let payload =
            serde_json::to_string(config).map_err(|e| MasterError::Decode(e.to_string()))?;
        self.post_ack(
            "v1/proxy/create_config",
            &CreateProxyConfigRequest {
                client_id,
                server_id,
                config: BASE64.encode(payload),
                overwrite,
            },
        )
        .await
    }

    async fn list_proxy_configs(&self, keyword: &str) -> Result<Vec<ProxyRecord>, MasterError> {
        let resp: ListProxyConfigsResponse = self
            .post(
                "v1/proxy/list_configs",
                &PageRequest {
                    page: 1,
                    page_size: LIST_PAGE_SIZE,
                    keyword,
                },
            )
            .await?;
        Ok(resp.proxy_configs)
    }

    async fn get_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        name: &str,
    ) -> Result<ProxyState, MasterError> {
        self.post(
            "v1/proxy/get_config",
            &ProxyRefRequest {
                client_id,
                server_id,
                name,
            },
        )
        .await
    }

    async fn delete_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        name: &str,
    ) -> Result<(), MasterError> {
        self.post_ack(
            "v1/proxy/delete_config",
            &ProxyRefRequest {
                client_id,
                server_id,
                name,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn create_request_wraps_config_in_base64_json() {
        let config = ProxyConfigWire {
            proxies: vec![crate::types::ProxyDetailWire {
                name: "ret2shell:T1:web:8080/http".to_string(),
                proxy_type: "http".to_string(),
                local_port: 8080,
                local_ip: "127.0.0.1".to_string(),
                subdomain: Some("node1-abc".to_string()),
                remote_port: None,
            }],
        };
        let encoded = BASE64.encode(serde_json::to_string(&config).unwrap());
        let decoded: ProxyConfigWire =
            serde_json::from_slice(&BASE64.decode(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, config);

        let request = CreateProxyConfigRequest {
            client_id: "user.c.node1",
            server_id: "user.s.node1",
            config: encoded,
            overwrite: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["clientId"].is_string());
        assert!(json["serverId"].is_string());
        assert_eq!(json["overwrite"], false);
        // the envelope stays a base64 string, never inlined JSON
        assert!(json["config"].is_string());
    }

    #[test]
    fn refreshed_token_prefers_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-set-authorization",
            HeaderValue::from_static("Bearer fresh-token"),
        );
        headers.insert(
            SET_COOKIE,
            HeaderValue::from_static("frp-panel-cookie=cookie-token; Path=/"),
        );
        assert_eq!(refreshed_token(&headers).as_deref(), Some("fresh-token"));
    }

    #[test]
    fn refreshed_token_falls_back_to_the_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SET_COOKIE,
            HeaderValue::from_static("other=1; Path=/"),
        );
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("frp-panel-cookie=cookie-token; HttpOnly"),
        );
        assert_eq!(refreshed_token(&headers).as_deref(), Some("cookie-token"));
    }

    #[test]
    fn refreshed_token_ignores_unrelated_headers() {
        let headers = HeaderMap::new();
        assert_eq!(refreshed_token(&headers), None);
    }

    #[test]
    fn page_request_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(PageRequest {
            page: 1,
            page_size: 100,
            keyword: "user.s",
        })
        .unwrap();
        assert_eq!(json["pageSize"], 100);
        assert_eq!(json["keyword"], "user.s");
    }
}
