//! Traffic lifecycle engine
//!
//! The subsystem that allocates remote ports across tunnel servers,
//! idempotently creates or extends proxy configurations through the
//! tunnel master, maintains the three index tables in the shared
//! expiring KV store, and runs the two garbage-collection sweeps that
//! converge the indexes after partial failures.

pub mod allocator;
pub mod error;
pub mod manager;
pub mod reaper;
pub mod types;

pub use allocator::PortAllocator;
pub use error::TrafficError;
pub use manager::{DeleteOutcome, TrafficManager};
pub use reaper::Reaper;
pub use types::{
    proxy_name, port_key, sanitize_subdomain, subdomain_for, AppProtocol, NormalizedPort,
    NormalizedService, Port, Protocol, ProxyConfigDoc, ProxyDetail, ServerEntry, Service,
    ServiceType, TrafficAddr, TrafficConf, WorkingProxy, PROXY_NAME_PREFIX,
};
