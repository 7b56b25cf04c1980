//! Per-origin host clients.
//!
//! A host client owns the connections to exactly one origin. The inventory
//! creates one through a [`HostClientFactory`] when an origin is registered
//! and closes it when the origin is removed or replaced.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::ProxyError;
use crate::origin::Origin;

/// Fully buffered request travelling through the dispatch pipeline.
pub type ProxyRequest = http::Request<Bytes>;

/// Fully buffered response returned by a host client.
pub type ProxyResponse = http::Response<Bytes>;

/// Per-request information about the inbound connection.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_address: Option<SocketAddr>,
    pub secure: bool,
}

/// Load figures a host client reports to load-balancing strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadBalancingMetric {
    pub ongoing_requests: usize,
}

/// Sends requests to a single origin.
#[async_trait]
pub trait HostClient: Send + Sync {
    async fn send_request(
        &self,
        request: ProxyRequest,
        context: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError>;

    fn load_balancing_metric(&self) -> LoadBalancingMetric;

    /// Releases the client's connections. Further requests fail.
    fn close(&self);
}

/// Creates the host client for a newly registered origin.
pub trait HostClientFactory: Send + Sync {
    fn create(&self, origin: &Origin) -> Arc<dyn HostClient>;
}

/// Counts a request as ongoing for as long as the guard lives.
struct OngoingRequest<'a>(&'a AtomicUsize);

impl<'a> OngoingRequest<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for OngoingRequest<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Plain HTTP/1 host client backed by hyper's pooled client.
///
/// TLS settings on the origin are not acted upon here; TLS origins need a
/// factory that builds a TLS-capable connector.
pub struct HttpHostClient {
    origin: Origin,
    client: Client<HttpConnector, Full<Bytes>>,
    ongoing: AtomicUsize,
    response_timeout: Duration,
    closed: AtomicBool,
}

impl HttpHostClient {
    pub fn new(origin: Origin, settings: &HttpClientSettings) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(settings.connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .pool_idle_timeout(settings.idle_timeout)
            .build(connector);

        Self {
            origin,
            client,
            ongoing: AtomicUsize::new(0),
            response_timeout: settings.response_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn target_uri(&self, uri: &Uri) -> Result<Uri, ProxyError> {
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        format!("http://{}{}", self.origin.host_and_port(), path)
            .parse::<Uri>()
            .map_err(ProxyError::transport)
    }

    async fn exchange(&self, request: http::Request<Full<Bytes>>) -> Result<ProxyResponse, ProxyError> {
        let response = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                ProxyError::OriginUnreachable {
                    origin: self.origin.id().clone(),
                    reason: e.to_string(),
                }
            } else {
                ProxyError::transport(e)
            }
        })?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(ProxyError::transport)?
            .to_bytes();
        Ok(http::Response::from_parts(parts, body))
    }
}

#[async_trait]
impl HostClient for HttpHostClient {
    async fn send_request(
        &self,
        request: ProxyRequest,
        _context: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProxyError::OriginUnreachable {
                origin: self.origin.id().clone(),
                reason: "host client closed".to_string(),
            });
        }

        let (mut parts, body) = request.into_parts();
        parts.uri = self.target_uri(&parts.uri)?;
        let request = http::Request::from_parts(parts, Full::new(body));

        let _ongoing = OngoingRequest::start(&self.ongoing);
        match tokio::time::timeout(self.response_timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::ResponseTimeout {
                origin: self.origin.id().clone(),
            }),
        }
    }

    fn load_balancing_metric(&self) -> LoadBalancingMetric {
        LoadBalancingMetric {
            ongoing_requests: self.ongoing.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(origin = %self.origin, "host client closed");
        }
    }
}

/// Connection settings shared by every [`HttpHostClient`] of a backend service.
#[derive(Debug, Clone)]
pub struct HttpClientSettings {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(2000),
            response_timeout: Duration::from_millis(60_000),
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Builds [`HttpHostClient`]s with shared settings.
#[derive(Debug, Clone, Default)]
pub struct HttpHostClientFactory {
    settings: HttpClientSettings,
}

impl HttpHostClientFactory {
    pub fn new(settings: HttpClientSettings) -> Self {
        Self { settings }
    }
}

impl HostClientFactory for HttpHostClientFactory {
    fn create(&self, origin: &Origin) -> Arc<dyn HostClient> {
        Arc::new(HttpHostClient::new(origin.clone(), &self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdTcpListener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn free_port() -> u16 {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Serves one canned HTTP/1.1 response per connection.
    async fn spawn_origin(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        port
    }

    fn get(path: &str) -> ProxyRequest {
        http::Request::get(path).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_sends_request_to_origin() {
        let port = spawn_origin(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let client = HttpHostClient::new(
            Origin::new("app", "app-01", "127.0.0.1", port),
            &HttpClientSettings::default(),
        );

        let response = client
            .send_request(get("/index.html?x=1"), &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), b"hello");
        assert_eq!(client.load_balancing_metric().ongoing_requests, 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_origin_unreachable() {
        let port = free_port();
        let client = HttpHostClient::new(
            Origin::new("app", "app-01", "127.0.0.1", port),
            &HttpClientSettings::default(),
        );

        let err = client
            .send_request(get("/"), &RequestContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::OriginUnreachable { .. }));
        assert_eq!(client.load_balancing_metric().ongoing_requests, 0);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let client = HttpHostClient::new(
            Origin::new("app", "app-01", "127.0.0.1", free_port()),
            &HttpClientSettings::default(),
        );
        client.close();

        let err = client
            .send_request(get("/"), &RequestContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("host client closed"));
    }

    #[tokio::test]
    async fn test_silent_origin_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let settings = HttpClientSettings {
            response_timeout: Duration::from_millis(100),
            ..HttpClientSettings::default()
        };
        let client = HttpHostClient::new(Origin::new("app", "app-01", "127.0.0.1", port), &settings);

        let err = client
            .send_request(get("/"), &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::ResponseTimeout { .. }));
    }

    #[test]
    fn test_factory_creates_clients() {
        let factory = HttpHostClientFactory::default();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let client = factory.create(&Origin::new("app", "app-01", "localhost", 9090));
        assert_eq!(client.load_balancing_metric(), LoadBalancingMetric::default());
    }

    #[test]
    fn test_host_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpHostClient>();
    }
}
