//! Engine error taxonomy surfaced to the HTTP layer

use thiserror::Error;

use traffic_cache::CacheError;
use traffic_master::MasterError;

#[derive(Error, Debug)]
pub enum TrafficError {
    /// No tunnel server carries the configured master-user prefix and a
    /// locally configured node name
    #[error("no tunnel server available")]
    NoServer,

    /// The allocator could not find enough free ports in the server's
    /// configured range
    #[error("not enough free ports on {server_id}: {needed} requested")]
    PortsExhausted { server_id: String, needed: usize },

    /// The post-create proxy listing came back empty
    #[error("tunnel master reports no proxies for traffic {0}")]
    ProvisioningEmpty(String),

    /// The readiness poll was exhausted before every proxy ran
    #[error("proxies for traffic {0} did not become ready")]
    NotReady(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("tunnel master: {0}")]
    Master(#[from] MasterError),

    #[error("index codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
