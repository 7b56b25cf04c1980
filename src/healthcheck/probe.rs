//! Single health probes against one origin.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::Method;

use crate::client::{HostClient, HostClientFactory, ProxyRequest, RequestContext};
use crate::origin::Origin;

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Probes an origin once.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, origin: &Origin) -> HealthStatus;

    /// The origin is no longer probed; drop anything held for it.
    fn forget(&self, _origin: &Origin) {}
}

/// Sends `GET <uri>` to the origin through a host client; healthy on a 2xx
/// answer within the timeout.
///
/// Keeps one host client per probed origin until the origin is forgotten.
pub struct UrlHealthCheck {
    factory: Arc<dyn HostClientFactory>,
    clients: DashMap<Origin, Arc<dyn HostClient>>,
    path: String,
    timeout: Duration,
}

impl UrlHealthCheck {
    pub fn new(uri: impl Into<String>, timeout: Duration, factory: Arc<dyn HostClientFactory>) -> Self {
        let uri = uri.into();
        let path = if uri.starts_with('/') {
            uri
        } else {
            format!("/{uri}")
        };
        Self {
            factory,
            clients: DashMap::new(),
            path,
            timeout,
        }
    }

    fn client(&self, origin: &Origin) -> Arc<dyn HostClient> {
        self.clients
            .entry(origin.clone())
            .or_insert_with(|| self.factory.create(origin))
            .clone()
    }

    fn probe_request(&self, origin: &Origin) -> Result<ProxyRequest, http::Error> {
        http::Request::builder()
            .method(Method::GET)
            .uri(self.path.as_str())
            .header(http::header::HOST, origin.host_and_port())
            .body(Bytes::new())
    }
}

#[async_trait]
impl HealthCheck for UrlHealthCheck {
    async fn check(&self, origin: &Origin) -> HealthStatus {
        let request = match self.probe_request(origin) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(origin = %origin, uri = %self.path, error = %e, "invalid health check request");
                return HealthStatus::Unhealthy;
            }
        };

        let client = self.client(origin);
        let context = RequestContext::default();
        match tokio::time::timeout(self.timeout, client.send_request(request, &context)).await {
            Ok(Ok(response)) if response.status().is_success() => HealthStatus::Healthy,
            Ok(Ok(response)) => {
                tracing::debug!(origin = %origin, status = response.status().as_u16(), "health check failed");
                HealthStatus::Unhealthy
            }
            Ok(Err(e)) => {
                tracing::debug!(origin = %origin, error = %e, "health check failed");
                HealthStatus::Unhealthy
            }
            Err(_) => {
                tracing::debug!(origin = %origin, "health check timed out");
                HealthStatus::Unhealthy
            }
        }
    }

    fn forget(&self, origin: &Origin) {
        if let Some((_, client)) = self.clients.remove(origin) {
            client.close();
        }
    }
}
