//! Remote-port allocator
//!
//! Picks free ports for one tunnel server out of its configured
//! inclusive range, with the `port:{server_id}:{port}` index entries as
//! the source of truth for occupancy. The starting point is drawn
//! uniformly at random; from there the scan is a linear probe upward to
//! the top of the range, then downward from the seed.
//!
//! Allocation does not reserve anything. The caller writes the `port`
//! index entries under its own critical section so that two concurrent
//! allocations cannot settle on the same gap.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use traffic_cache::{Cache, CacheKey};

use crate::error::TrafficError;

pub struct PortAllocator {
    cache: Arc<dyn Cache>,
}

impl PortAllocator {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Return `count` distinct free ports in the inclusive `range`,
    /// or [`TrafficError::PortsExhausted`] when fewer are free.
    pub async fn allocate(
        &self,
        server_id: &str,
        range: (u16, u16),
        count: usize,
    ) -> Result<Vec<u16>, TrafficError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let (lo, hi) = range;
        if lo > hi {
            return Err(TrafficError::PortsExhausted {
                server_id: server_id.to_string(),
                needed: count,
            });
        }

        let pattern = CacheKey::new()
            .push("port")
            .push(server_id)
            .push("*")
            .to_string();
        let occupied: HashSet<u16> = self
            .cache
            .keys(&pattern)
            .await?
            .iter()
            .filter_map(|key| key.rsplit(':').next()?.parse().ok())
            .collect();

        let seed = rand::thread_rng().gen_range(lo..=hi);
        let mut free = Vec::with_capacity(count);
        for port in seed..=hi {
            if !occupied.contains(&port) {
                free.push(port);
                if free.len() == count {
                    break;
                }
            }
        }
        if free.len() < count {
            for port in (lo..seed).rev() {
                if !occupied.contains(&port) {
                    free.push(port);
                    if free.len() == count {
                        break;
                    }
                }
            }
        }

        if free.len() < count {
            return Err(TrafficError::PortsExhausted {
                server_id: server_id.to_string(),
                needed: count,
            });
        }
        debug!(server_id, ?free, "allocated remote ports");
        Ok(free)
    }
}
