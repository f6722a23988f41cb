//! Builds the proxy stack from configuration and serves until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{info, warn};

use crate::cache::{CacheStore, FsCacheStore, MemoryCacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::WorkerConfig;
use crate::fetch::{Fetch, HttpFetcher};
use crate::lifecycle::Worker;
use crate::proxy::Proxy;
use crate::server::Server;

use super::logging::init_logging;

/// Runs the proxy described by `config`.
///
/// # Errors
///
/// Fails if the store cannot be opened, install fails on every attempt, or
/// the listen address cannot be bound.
pub async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    init_logging(&config.logging);

    let store: Arc<dyn CacheStore> = match &config.store.dir {
        Some(dir) => Arc::new(
            FsCacheStore::open(dir, Some(config.store.quota_bytes))
                .await
                .with_context(|| format!("opening cache store at {}", dir.display()))?,
        ),
        None => {
            info!("no store directory configured; caching in memory");
            Arc::new(MemoryCacheStore::new().with_quota(config.store.quota_bytes))
        }
    };
    let fetcher: Arc<dyn Fetch> = Arc::new(
        HttpFetcher::new()
            .timeout(config.upstream.timeout())
            .max_response_bytes(config.upstream.max_response_bytes),
    );

    let worker = install(&config, store, fetcher, Arc::new(SystemClock)).await?;
    let proxy = Proxy::new(Arc::new(worker), &config.server);

    let server = Server::bind(&config.server.listen).await?;
    info!(
        listen = %server.local_addr(),
        upstream = %config.upstream.origin,
        "proxy ready"
    );

    server
        .run_until(
            move |request| {
                let proxy = proxy.clone();
                async move { proxy.respond(request).await }
            },
            shutdown_signal(),
        )
        .await?;
    Ok(())
}

/// Installs a fresh worker, retrying up to `install_attempts` times. A failed
/// worker is redundant, so every attempt builds a new one.
///
/// # Errors
///
/// The last install error once every attempt has failed.
pub async fn install(
    config: &WorkerConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetch>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Worker> {
    let routes = config.route_table()?;
    let attempts = config.install_attempts;

    for attempt in 1..=attempts {
        let worker = Worker::new(
            config.worker_settings(),
            routes.clone(),
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&clock),
        );
        match worker.install().await {
            Ok(()) => {
                info!(attempt, phase = %worker.phase().await, "worker installed");
                return Ok(worker);
            }
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, error = %e, "install failed, retrying");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("install failed after {attempts} attempts"));
            }
        }
    }
    bail!("install_attempts must be at least 1")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
