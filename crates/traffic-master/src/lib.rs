//! Client for the reverse-tunnel master's control API
//!
//! The engine consumes the master only through the [`TunnelMaster`]
//! trait; [`MasterClient`] is the production implementation speaking
//! JSON over HTTPS with bearer authentication and automatic token
//! refresh. Wire field names are lowerCamelCase; everything on this side
//! of the boundary stays snake_case.

pub mod client;
pub mod types;

pub use client::MasterClient;
pub use types::{
    ProxyConfigWire, ProxyDetailWire, ProxyRecord, ProxyState, Server, TunnelClient,
    WorkingStatus,
};

use async_trait::async_trait;
use thiserror::Error;

use traffic_cache::CacheError;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("master api error (code {code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("unexpected master response: {0}")]
    Decode(String),

    #[error("login did not yield a token")]
    MissingToken,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// The RPC surface the engine consumes
///
/// `list_clients` is unused by the engine but kept on the interface; the
/// master exposes the two list endpoints symmetrically.
#[async_trait]
pub trait TunnelMaster: Send + Sync {
    async fn list_servers(&self, keyword: &str) -> Result<Vec<Server>, MasterError>;

    async fn list_clients(&self, keyword: &str) -> Result<Vec<TunnelClient>, MasterError>;

    async fn create_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        config: &ProxyConfigWire,
        overwrite: bool,
    ) -> Result<(), MasterError>;

    async fn list_proxy_configs(&self, keyword: &str) -> Result<Vec<ProxyRecord>, MasterError>;

    async fn get_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        name: &str,
    ) -> Result<ProxyState, MasterError>;

    async fn delete_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        name: &str,
    ) -> Result<(), MasterError>;
}
