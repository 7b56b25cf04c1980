//! Proxy configuration.
//!
//! Loaded from a JSON file; listen addresses may be overridden through the
//! `ORIGIN_DISPATCH_LISTEN` and `ORIGIN_DISPATCH_HEALTH_LISTEN` variables.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{RewriteConfig, DEFAULT_MAX_ATTEMPTS};
use crate::error::ConfigError;
use crate::origin::{AppId, Origin, TlsSettings};

pub const LISTEN_ENV: &str = "ORIGIN_DISPATCH_LISTEN";
pub const HEALTH_LISTEN_ENV: &str = "ORIGIN_DISPATCH_HEALTH_LISTEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    pub listen: String,
    pub health_listen: String,
    pub backend: BackendServiceConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            health_listen: "0.0.0.0:8081".to_string(),
            backend: BackendServiceConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Reads a JSON config file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(LISTEN_ENV) {
            self.listen = listen;
        }
        if let Some(listen) = lookup(HEALTH_LISTEN_ENV) {
            self.health_listen = listen;
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.listen)
    }

    pub fn health_listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.health_listen)
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))
}

/// One backend application and how requests to it are dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendServiceConfig {
    pub id: AppId,
    pub origins: Vec<OriginConfig>,
    pub rewrites: Vec<RewriteConfig>,
    pub sticky_session: StickySessionConfig,
    pub origin_restriction_cookie: Option<String>,
    pub origin_id_header: String,
    pub override_host_header: bool,
    pub health_check: HealthCheckConfig,
    pub max_attempts: usize,
    pub load_balancing: LoadBalancingStrategyKind,
}

impl Default for BackendServiceConfig {
    fn default() -> Self {
        Self {
            id: AppId::from("default"),
            origins: Vec::new(),
            rewrites: Vec::new(),
            sticky_session: StickySessionConfig::default(),
            origin_restriction_cookie: None,
            origin_id_header: "X-Origin-Id".to_string(),
            override_host_header: false,
            health_check: HealthCheckConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            load_balancing: LoadBalancingStrategyKind::default(),
        }
    }
}

impl BackendServiceConfig {
    /// Builds the configured origins, rejecting reused ids and addresses.
    pub fn build_origins(&self) -> Result<Vec<Origin>, ConfigError> {
        let origins: Vec<Origin> = self
            .origins
            .iter()
            .map(|config| config.to_origin(&self.id))
            .collect::<Result<_, _>>()?;
        Origin::check_distinct(&origins)?;
        Ok(origins)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl OriginConfig {
    fn to_origin(&self, app_id: &AppId) -> Result<Origin, ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidOrigins(format!(
                "origin at {}:{} has no id",
                self.host, self.port
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidOrigins(format!(
                "origin '{}' has no host",
                self.id
            )));
        }
        let origin = Origin::new(app_id.clone(), self.id.as_str(), self.host.as_str(), self.port);
        Ok(match &self.tls {
            Some(tls) => origin.with_tls(tls.clone()),
            None => origin,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StickySessionConfig {
    pub enabled: bool,
    pub timeout_seconds: u64,
}

impl Default for StickySessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: 43200,
        }
    }
}

impl StickySessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Health probing; without a `uri` origins are not probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckConfig {
    pub uri: Option<String>,
    pub interval_millis: u64,
    pub timeout_millis: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            uri: None,
            interval_millis: 5000,
            timeout_millis: 2000,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

impl HealthCheckConfig {
    pub fn is_enabled(&self) -> bool {
        self.uri.as_deref().is_some_and(|uri| !uri.trim().is_empty())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalancingStrategyKind {
    #[default]
    RoundRobin,
    BusyConnections,
}
