//! TOML configuration for the controller
//!
//! ```toml
//! [app]
//! auth_token = "change-me"
//! cleanup_interval = 60
//!
//! [cache]
//! url = "redis://127.0.0.1:6379/0"   # empty or absent = in-memory
//!
//! [master]
//! api_base = "https://master.example.com/api"
//! username = "user"
//! password = "secret"
//!
//! [[server]]
//! node_name = "node1"
//! port_range = [10000, 10999]
//! remote_addr = "203.0.113.7"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use traffic_engine::ServerEntry;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub master: MasterConfig,
    #[serde(default)]
    pub server: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bearer token the `/v1` routes require
    pub auth_token: String,
    /// Seconds between reaper sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Bind address of the HTTP surface
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// KV store endpoint; empty selects the in-memory cache
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    pub api_base: String,
    pub username: String,
    pub password: String,
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
