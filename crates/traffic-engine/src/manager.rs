//! Traffic manager: the engine's public surface
//!
//! Owns all write concurrency discipline. `mutex_cache_w` serializes
//! every state-mutating top-level operation (updates, deletes, each
//! sweep item); `mutex_port` nests inside the create path and couples
//! port allocation with the master-side proxy creation and the `port`
//! index writes. Lock order is fixed: `mutex_cache_w` first,
//! `mutex_port` second, never the reverse.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use traffic_cache::{try_parse_json, Cache, CacheKey};
use traffic_master::TunnelMaster;

use crate::allocator::PortAllocator;
use crate::error::TrafficError;
use crate::types::{
    port_key, proxy_name, subdomain_for, NormalizedService, ProxyConfigDoc, ProxyDetail,
    ServerEntry, Service, ServiceType, TrafficAddr, TrafficConf, WorkingProxy, LOCAL_PROXY_IP,
    PROXY_NAME_PREFIX,
};

const READY_ATTEMPTS: usize = 5;
const READY_POLL_DELAY: Duration = Duration::from_millis(500);
/// Breather between sweep items so a large index scan cannot saturate
/// the shared store
const SWEEP_ITEM_PAUSE: Duration = Duration::from_millis(5);

/// Result of a delete: the address snapshot the traffic held, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub traffic_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<BTreeMap<String, String>>,
}

pub struct TrafficManager {
    cache: Arc<dyn Cache>,
    master: Arc<dyn TunnelMaster>,
    allocator: PortAllocator,
    master_user: String,
    servers: Vec<ServerEntry>,
    /// Writer lock for every state-mutating top-level operation
    mutex_cache_w: Mutex<()>,
    /// Serializes port allocation + proxy creation + `port` index writes
    mutex_port: Mutex<()>,
}

fn conf_key(traffic_id: &str) -> String {
    CacheKey::new()
        .push("traffic")
        .push(traffic_id)
        .push("conf")
        .to_string()
}

fn addr_key(traffic_id: &str) -> String {
    CacheKey::new()
        .push("traffic")
        .push(traffic_id)
        .push("addr")
        .to_string()
}

fn working_key(traffic_id: &str) -> String {
    CacheKey::new().push("working").push(traffic_id).to_string()
}

fn port_entry_key(server_id: &str, port: u16) -> String {
    CacheKey::new()
        .push("port")
        .push(server_id)
        .push(&port.to_string())
        .to_string()
}

fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

impl TrafficManager {
    pub fn new(
        cache: Arc<dyn Cache>,
        master: Arc<dyn TunnelMaster>,
        master_user: &str,
        servers: Vec<ServerEntry>,
    ) -> Self {
        Self {
            allocator: PortAllocator::new(cache.clone()),
            cache,
            master,
            master_user: master_user.to_string(),
            servers,
            mutex_cache_w: Mutex::new(()),
            mutex_port: Mutex::new(()),
        }
    }

    /// Create or extend the proxy configuration for one service and
    /// return the public address per port key.
    pub async fn update_traffic(
        &self,
        node_name: &str,
        service: Service,
    ) -> Result<BTreeMap<String, String>, TrafficError> {
        let _write_guard = self.mutex_cache_w.lock().await;
        self.update_traffic_inner(node_name, service).await
    }

    /// Tear down one traffic's indexes and master-side proxies. The
    /// `working` entry is left in place; the dead-traffic sweep removes
    /// it once `conf` is observed absent, so a crash mid-delete still
    /// converges to a full master-side teardown.
    pub async fn delete_traffic(&self, traffic_id: &str) -> Result<DeleteOutcome, TrafficError> {
        let _write_guard = self.mutex_cache_w.lock().await;
        self.delete_traffic_inner(traffic_id).await
    }

    async fn update_traffic_inner(
        &self,
        node_name: &str,
        service: Service,
    ) -> Result<BTreeMap<String, String>, TrafficError> {
        let service = NormalizedService::from(service);
        let traffic_id = service.traffic.clone();

        let conf_raw = self.cache.get(&conf_key(&traffic_id)).await?;
        let addr_raw = self.cache.get(&addr_key(&traffic_id)).await?;

        if let (Some(_), Some(addr_raw)) = (&conf_raw, &addr_raw) {
            // Extend: both anchors exist, renew their TTLs and return
            // the stored addresses. No master RPC.
            let delta = service.expire_at() - now_seconds();
            self.cache.expire(&conf_key(&traffic_id), delta).await?;
            self.cache.expire(&addr_key(&traffic_id), delta).await?;
            let addr: TrafficAddr = try_parse_json(addr_raw).ok_or_else(|| {
                TrafficError::Internal(format!("stored addr for {traffic_id} is corrupt"))
            })?;
            debug!(%traffic_id, delta, "extended existing traffic");
            return Ok(addr.remote_addr);
        }

        self.create_traffic(node_name, &service).await
    }

    async fn create_traffic(
        &self,
        node_name: &str,
        service: &NormalizedService,
    ) -> Result<BTreeMap<String, String>, TrafficError> {
        let traffic_id = &service.traffic;

        // Every TTL write below would collapse into a delete; a service
        // that is already past its deadline is not provisioned at all.
        if service.expire_at() <= now_seconds() {
            info!(%traffic_id, "service deadline already passed, nothing provisioned");
            return Ok(BTreeMap::new());
        }

        let (server_id, entry) = self.pick_server().await?;
        let client_id = format!("{}.c.{}", self.master_user, node_name);

        let details: Vec<ProxyDetail>;
        {
            let _port_guard = self.mutex_port.lock().await;

            let non_http = service
                .ports
                .iter()
                .filter(|p| p.service_type != ServiceType::Http)
                .count();
            let allocated = self
                .allocator
                .allocate(&server_id, entry.port_range, non_http)
                .await?;

            let mut remote_ports = allocated.iter().copied();
            details = service
                .ports
                .iter()
                .map(|port| {
                    let name = proxy_name(traffic_id, port);
                    match port.service_type {
                        ServiceType::Http => ProxyDetail {
                            name,
                            proxy_type: ServiceType::Http,
                            local_port: port.node_port,
                            local_ip: LOCAL_PROXY_IP.to_string(),
                            subdomain: Some(subdomain_for(node_name)),
                            remote_port: None,
                        },
                        service_type => ProxyDetail {
                            name,
                            proxy_type: service_type,
                            local_port: port.node_port,
                            local_ip: LOCAL_PROXY_IP.to_string(),
                            subdomain: None,
                            remote_port: remote_ports.next(),
                        },
                    }
                })
                .collect();

            let config = ProxyConfigDoc {
                proxies: details.clone(),
            };
            // Best-effort: a dropped create is retried by the next
            // update or repaired by the sweeps; the list below decides
            // what actually exists.
            if let Err(err) = self
                .master
                .create_proxy_config(&client_id, &server_id, &(&config).into(), false)
                .await
            {
                warn!(%traffic_id, error = %err, "create_proxy_config failed");
            }

            for port in &allocated {
                self.cache
                    .set(&port_entry_key(&server_id, *port), traffic_id, None)
                    .await?;
            }
        }

        let listed = self
            .master
            .list_proxy_configs(&format!("{PROXY_NAME_PREFIX}:{traffic_id}:"))
            .await?;
        if listed.is_empty() {
            return Err(TrafficError::ProvisioningEmpty(traffic_id.clone()));
        }

        let working: Vec<WorkingProxy> = listed
            .into_iter()
            .map(|record| WorkingProxy {
                client_id: record.client_id,
                server_id: record.server_id,
                name: record.name,
            })
            .collect();
        self.cache
            .set(&working_key(traffic_id), &serde_json::to_string(&working)?, None)
            .await?;

        let conf = TrafficConf {
            client_id,
            server_id: server_id.clone(),
            config: ProxyConfigDoc {
                proxies: details.clone(),
            },
        };
        self.cache
            .set(
                &conf_key(traffic_id),
                &serde_json::to_string(&conf)?,
                Some(service.expire_at() - now_seconds()),
            )
            .await?;

        let reported = match self.poll_ready(traffic_id, &working).await {
            Ok(reported) => reported,
            Err(err) => {
                if let Err(del_err) = self.delete_traffic_inner(traffic_id).await {
                    warn!(%traffic_id, error = %del_err, "compensating delete failed");
                }
                return Err(err);
            }
        };

        let mut remote_addr = BTreeMap::new();
        let mut remote_ports = Vec::new();
        for detail in &details {
            let key = port_key(&detail.name);
            let addr = reported.get(&detail.name).cloned().unwrap_or_default();
            let value = match detail.proxy_type {
                ServiceType::Http => addr,
                _ => {
                    // the master reports 0.0.0.0:{port}; keep the port,
                    // substitute the server's public address
                    let public_port = addr.rsplit(':').next().unwrap_or_default();
                    format!("{}:{}", entry.remote_addr, public_port)
                }
            };
            if let Some(remote_port) = detail.remote_port {
                remote_ports.push(remote_port);
            }
            remote_addr.insert(key, value);
        }

        let addr = TrafficAddr {
            remote_ports,
            remote_addr: remote_addr.clone(),
        };
        self.cache
            .set(
                &addr_key(traffic_id),
                &serde_json::to_string(&addr)?,
                Some(service.expire_at() - now_seconds()),
            )
            .await?;

        info!(%traffic_id, proxies = details.len(), "traffic provisioned");
        Ok(remote_addr)
    }

    /// Pick one acceptable tunnel server uniformly at random.
    /// Acceptable: the master knows it under `{master_user}.s.{node}`
    /// and `{node}` is locally configured.
    async fn pick_server(&self) -> Result<(String, ServerEntry), TrafficError> {
        let prefix = format!("{}.s", self.master_user);
        let id_prefix = format!("{}.s.", self.master_user);
        let known = self.master.list_servers(&prefix).await?;

        let mut candidates = Vec::new();
        for server in known {
            let Some(node) = server.id.strip_prefix(&id_prefix) else {
                continue;
            };
            if let Some(entry) = self.servers.iter().find(|e| e.node_name == node) {
                candidates.push((server.id.clone(), entry.clone()));
            }
        }
        if candidates.is_empty() {
            return Err(TrafficError::NoServer);
        }
        let pick = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates.swap_remove(pick))
    }

    /// Poll the master until every working proxy reports `running`,
    /// returning the reported address per proxy name. Up to
    /// `READY_ATTEMPTS` rounds, `READY_POLL_DELAY` apart.
    async fn poll_ready(
        &self,
        traffic_id: &str,
        working: &[WorkingProxy],
    ) -> Result<HashMap<String, String>, TrafficError> {
        for attempt in 1..=READY_ATTEMPTS {
            let states = join_all(working.iter().map(|proxy| async move {
                let state = self
                    .master
                    .get_proxy_config(&proxy.client_id, &proxy.server_id, &proxy.name)
                    .await;
                (proxy.name.clone(), state)
            }))
            .await;

            let mut reported = HashMap::new();
            let mut all_running = !states.is_empty();
            for (name, state) in states {
                match state {
                    Ok(state) if state.is_running() => {
                        let addr = state.reported_addr().unwrap_or_default().to_string();
                        reported.insert(name, addr);
                    }
                    Ok(_) => all_running = false,
                    Err(err) => {
                        debug!(traffic_id, proxy = %name, error = %err, "status probe failed");
                        all_running = false;
                    }
                }
            }
            if all_running {
                return Ok(reported);
            }
            if attempt < READY_ATTEMPTS {
                tokio::time::sleep(READY_POLL_DELAY).await;
            }
        }
        Err(TrafficError::NotReady(traffic_id.to_string()))
    }

    async fn delete_traffic_inner(&self, traffic_id: &str) -> Result<DeleteOutcome, TrafficError> {
        let working_raw = self.cache.get(&working_key(traffic_id)).await?;
        let conf_raw = self.cache.get(&conf_key(traffic_id)).await?;
        let addr_raw = self.cache.get(&addr_key(traffic_id)).await?;

        let conf: Option<TrafficConf> = conf_raw.as_deref().and_then(try_parse_json);
        let addr: Option<TrafficAddr> = addr_raw.as_deref().and_then(try_parse_json);
        let working: Option<Vec<WorkingProxy>> = working_raw.as_deref().and_then(try_parse_json);

        let mut jobs: Vec<Pin<Box<dyn Future<Output = ()> + Send + '_>>> = Vec::new();
        jobs.push(Box::pin(self.del_best_effort(conf_key(traffic_id))));
        jobs.push(Box::pin(self.del_best_effort(addr_key(traffic_id))));
        if let (Some(conf), Some(addr)) = (&conf, &addr) {
            for port in &addr.remote_ports {
                jobs.push(Box::pin(
                    self.del_best_effort(port_entry_key(&conf.server_id, *port)),
                ));
            }
        }
        if let Some(working) = &working {
            for proxy in working {
                jobs.push(Box::pin(self.master_delete_best_effort(proxy)));
            }
        }
        join_all(jobs).await;

        info!(traffic_id, "traffic deleted");
        Ok(DeleteOutcome {
            traffic_id: traffic_id.to_string(),
            remote_addr: addr.map(|a| a.remote_addr),
        })
    }

    // ── Sweeps ─────────────────────────────────────────────────────────
    // The reaper's periodic passes. Each item body runs under the same
    // writer lock as the request paths, so a sweep can never observe a
    // half-written traffic.

    /// Remove `working` entries whose anchoring `conf` has expired and
    /// tear down their master-side proxies.
    pub async fn sweep_dead_traffic(&self) -> Result<(), TrafficError> {
        let keys = self.cache.keys("working:*").await?;
        for key in keys {
            let Some(traffic_id) = key.strip_prefix("working:") else {
                continue;
            };
            {
                let _write_guard = self.mutex_cache_w.lock().await;
                if let Err(err) = self.reap_traffic(traffic_id).await {
                    warn!(traffic_id, error = %err, "dead-traffic sweep item failed");
                }
            }
            tokio::time::sleep(SWEEP_ITEM_PAUSE).await;
        }
        Ok(())
    }

    async fn reap_traffic(&self, traffic_id: &str) -> Result<(), TrafficError> {
        let Some(raw) = self.cache.get(&working_key(traffic_id)).await? else {
            return Ok(());
        };
        match try_parse_json::<Vec<WorkingProxy>>(&raw) {
            Some(proxies) => {
                if self.cache.exists(&conf_key(traffic_id)).await? {
                    return Ok(());
                }
                info!(traffic_id, proxies = proxies.len(), "reaping dead traffic");
                let mut jobs: Vec<Pin<Box<dyn Future<Output = ()> + Send + '_>>> = vec![
                    Box::pin(self.del_best_effort(working_key(traffic_id))),
                    Box::pin(self.del_best_effort(conf_key(traffic_id))),
                    Box::pin(self.del_best_effort(addr_key(traffic_id))),
                ];
                for proxy in &proxies {
                    jobs.push(Box::pin(self.master_delete_best_effort(proxy)));
                }
                join_all(jobs).await;
            }
            None => {
                warn!(traffic_id, "working entry is corrupt, dropping indexes");
                join_all([
                    self.del_best_effort(working_key(traffic_id)),
                    self.del_best_effort(conf_key(traffic_id)),
                    self.del_best_effort(addr_key(traffic_id)),
                ])
                .await;
            }
        }
        Ok(())
    }

    /// Remove `port` entries whose anchoring `working` entry is gone.
    /// Anchoring on `working` (not `conf`) keeps a port reserved until
    /// its master-side proxy has actually been torn down.
    pub async fn sweep_dead_ports(&self) -> Result<(), TrafficError> {
        let keys = self.cache.keys("port:*:*").await?;
        for key in keys {
            // a loose glob may also return keys with extra segments
            if key.split(':').count() != 3 {
                continue;
            }
            {
                let _write_guard = self.mutex_cache_w.lock().await;
                if let Err(err) = self.reap_port(&key).await {
                    warn!(%key, error = %err, "dead-port sweep item failed");
                }
            }
            tokio::time::sleep(SWEEP_ITEM_PAUSE).await;
        }
        Ok(())
    }

    async fn reap_port(&self, key: &str) -> Result<(), TrafficError> {
        match self.cache.get(key).await? {
            Some(traffic_id) if !traffic_id.is_empty() => {
                if !self.cache.exists(&working_key(&traffic_id)).await? {
                    debug!(key, %traffic_id, "releasing port with no live traffic");
                    self.del_best_effort(key.to_string()).await;
                }
            }
            _ => {
                // value-less port entries are garbage
                self.del_best_effort(key.to_string()).await;
            }
        }
        Ok(())
    }

    async fn del_best_effort(&self, key: String) {
        if let Err(err) = self.cache.del(&key).await {
            warn!(%key, error = %err, "index delete failed, left for the sweep");
        }
    }

    async fn master_delete_best_effort(&self, proxy: &WorkingProxy) {
        if let Err(err) = self
            .master
            .delete_proxy_config(&proxy.client_id, &proxy.server_id, &proxy.name)
            .await
        {
            warn!(proxy = %proxy.name, error = %err, "delete_proxy_config failed, left for the sweep");
        }
    }
}
