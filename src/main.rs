//! trafficd - traffic controller for a reverse-tunnel master
//!
//! Fronts the tunnel master with a small authenticated HTTP API: the
//! orchestrator posts service descriptions, the controller provisions
//! (or extends) the matching proxy configurations and answers with the
//! public ingress addresses. Two background sweeps converge the index
//! tables after partial failures.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use traffic_cache::{Cache, MemoryCache, RedisCache};
use traffic_engine::{Reaper, TrafficManager};
use traffic_master::MasterClient;

use crate::config::Config;

/// Traffic controller fronting a reverse-tunnel master
#[derive(Parser, Debug)]
#[command(name = "trafficd")]
#[command(about = "Provision tunnel ingress for orchestrated services")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml", env = "TRAFFICD_CONFIG")]
    config: PathBuf,

    /// Bind address, overriding the configuration
    #[arg(long, env = "TRAFFICD_LISTEN")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(fmt::layer())
        .init();

    let config = Config::load(&cli.config)?;
    let listen = cli.listen.unwrap_or_else(|| config.app.listen.clone());

    let cache: Arc<dyn Cache> = if config.cache.url.is_empty() {
        info!("no cache url configured, using the in-memory store");
        Arc::new(MemoryCache::new())
    } else {
        info!(url = %config.cache.url, "connecting to the shared cache");
        Arc::new(
            RedisCache::connect(&config.cache.url)
                .await
                .context("connecting to the cache")?,
        )
    };

    let master = Arc::new(
        MasterClient::new(
            &config.master.api_base,
            &config.master.username,
            &config.master.password,
            cache.clone(),
        )
        .context("building the master client")?,
    );

    let manager = Arc::new(TrafficManager::new(
        cache,
        master,
        &config.master.username,
        config.server.clone(),
    ));

    Reaper::new(manager.clone(), config.app.cleanup_interval).spawn();
    info!(
        interval = config.app.cleanup_interval,
        "reaper sweeps scheduled"
    );

    let router = traffic_api::build_router(manager, &config.app.auth_token);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "traffic controller listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving the API")?;

    Ok(())
}
