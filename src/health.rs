//! HTTP health server.
//!
//! Serves `/healthz` (liveness), `/readyz` (readiness: at least one active
//! origin) and `/metrics` (Prometheus text format).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::loadbalancing::ActiveOrigins;
use crate::metrics::ProxyMetrics;

/// What the health endpoints report on.
#[derive(Clone)]
pub struct HealthState {
    origins: Arc<dyn ActiveOrigins>,
    metrics: Arc<ProxyMetrics>,
}

impl HealthState {
    pub fn new(origins: Arc<dyn ActiveOrigins>, metrics: Arc<ProxyMetrics>) -> Self {
        Self { origins, metrics }
    }

    fn is_ready(&self) -> bool {
        !self.origins.active_origins().is_empty()
    }
}

/// Answers a health request. Unknown paths get 404.
pub fn health_response<B>(req: &Request<B>, state: &HealthState) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/healthz" => text(StatusCode::OK, "ok"),
        "/readyz" if state.is_ready() => text(StatusCode::OK, "ok"),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "no active origins"),
        "/metrics" => {
            let mut response = Response::new(Full::new(Bytes::from(state.metrics.gather_text())));
            response.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Starts the HTTP health server on the given address.
///
/// Runs until the listener fails, handling each connection on its own task.
pub async fn start_health_server(addr: SocketAddr, state: HealthState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "health server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = health_response(&req, &state);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "health connection error");
            }
        });
    }
}
