//! Reverse proxy for one backend application.
//!
//! Reads a JSON config (path as the first argument), tracks the configured
//! origins and serves proxied traffic plus health endpoints until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use http::HeaderName;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use origin_dispatch::client::{
    BackendServiceClient, HttpClientSettings, HttpHostClientFactory, RewriteRuleset,
};
use origin_dispatch::config::{LoadBalancingStrategyKind, ProxyConfig};
use origin_dispatch::health::{start_health_server, HealthState};
use origin_dispatch::healthcheck::{
    NoOriginHealthStatusMonitor, OriginHealthStatusMonitor, ScheduledOriginHealthStatusMonitor,
    UrlHealthCheck,
};
use origin_dispatch::inventory::{InventoryOptions, OriginsInventory};
use origin_dispatch::loadbalancing::{
    self, ActiveOrigins, BusyConnectionsStrategy, LoadBalancer, RoundRobinStrategy,
};
use origin_dispatch::metrics::ProxyMetrics;
use origin_dispatch::proxy::start_proxy_server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            ProxyConfig::load(&path).with_context(|| format!("loading config from {path}"))?
        }
        None => ProxyConfig::from_env(),
    };
    let backend = &config.backend;
    tracing::info!(app = %backend.id, "origin-dispatch starting");

    let origins = backend.build_origins()?;
    let metrics = Arc::new(ProxyMetrics::new()?);
    let factory = Arc::new(HttpHostClientFactory::new(HttpClientSettings::default()));

    let scheduled = backend
        .health_check
        .uri
        .as_deref()
        .filter(|uri| !uri.trim().is_empty())
        .map(|uri| {
            let timeout = backend.health_check.timeout();
            let probes = HttpHostClientFactory::new(HttpClientSettings {
                connect_timeout: timeout,
                response_timeout: timeout,
                ..HttpClientSettings::default()
            });
            let check = UrlHealthCheck::new(uri, timeout, Arc::new(probes));
            Arc::new(ScheduledOriginHealthStatusMonitor::new(
                Arc::new(check),
                Duration::ZERO,
                backend.health_check.interval(),
            ))
        });
    let monitor: Arc<dyn OriginHealthStatusMonitor> = match &scheduled {
        Some(monitor) => {
            monitor.start();
            Arc::clone(monitor) as Arc<dyn OriginHealthStatusMonitor>
        }
        None => Arc::new(NoOriginHealthStatusMonitor),
    };

    let inventory = Arc::new(
        OriginsInventory::builder(backend.id.clone(), factory, metrics.clone())
            .health_monitor(monitor)
            .options(InventoryOptions {
                healthy_threshold: backend.health_check.healthy_threshold,
                unhealthy_threshold: backend.health_check.unhealthy_threshold,
                ..InventoryOptions::default()
            })
            .build(),
    );
    if origins.is_empty() {
        tracing::warn!(app = %backend.id, "no origins configured");
    } else {
        inventory.set_origins(origins)?;
    }

    let active: Arc<dyn ActiveOrigins> = inventory.clone();
    let strategy: Arc<dyn LoadBalancer> = match backend.load_balancing {
        LoadBalancingStrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new(active.clone())),
        LoadBalancingStrategyKind::BusyConnections => {
            Arc::new(BusyConnectionsStrategy::new(active.clone()))
        }
    };
    let load_balancer = loadbalancing::decorate(
        strategy,
        active.clone(),
        backend.sticky_session.enabled,
        backend.origin_restriction_cookie.as_deref(),
    );

    let origin_id_header = HeaderName::from_bytes(backend.origin_id_header.as_bytes())
        .with_context(|| format!("invalid origin id header '{}'", backend.origin_id_header))?;
    let client = Arc::new(
        BackendServiceClient::builder(backend.id.clone(), load_balancer, metrics.clone())
            .rewrites(RewriteRuleset::from_config(&backend.rewrites)?)
            .origin_id_header(origin_id_header)
            .sticky_session_timeout(backend.sticky_session.timeout())
            .origin_restriction_cookie(backend.origin_restriction_cookie.clone())
            .override_host_header(backend.override_host_header)
            .max_attempts(backend.max_attempts)
            .build(),
    );

    let proxy_addr = config.listen_addr()?;
    let health_addr = config.health_listen_addr()?;
    let proxy = tokio::spawn(start_proxy_server(proxy_addr, client));
    let health = tokio::spawn(start_health_server(
        health_addr,
        HealthState::new(active, metrics),
    ));

    tokio::select! {
        result = proxy => result.context("proxy task panicked")?.context("proxy server failed")?,
        result = health => result.context("health task panicked")?.context("health server failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for shutdown signal")?;
            tracing::info!("shutdown signal received");
        }
    }

    inventory.close();
    inventory.flush().await;
    if let Some(monitor) = scheduled {
        monitor.stop();
    }
    tracing::info!("origin-dispatch stopped");
    Ok(())
}
