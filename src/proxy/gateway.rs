//! Inbound HTTP/1 gateway.
//!
//! Buffers each request, hands it to the [`BackendServiceClient`] and writes
//! back the origin's response, or an error status when dispatch fails.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{
    HeaderName, CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::client::{BackendServiceClient, ProxyRequest, ProxyResponse, RequestContext};
use crate::error::ProxyError;

/// Status returned to the client for a failed dispatch.
pub fn error_status(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::NoAvailableHosts(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Removes connection-scoped headers, including those named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

/// Strips an origin response for the downstream connection. `Transfer-Encoding`
/// stays since it describes the body framing.
fn strip_response_hop_by_hop(headers: &mut HeaderMap) {
    let framing: Vec<_> = headers.get_all(TRANSFER_ENCODING).iter().cloned().collect();
    strip_hop_by_hop(headers);
    for value in framing {
        headers.append(TRANSFER_ENCODING, value);
    }
}

/// Proxies one buffered request through the backend service client.
pub async fn proxy(
    client: &BackendServiceClient,
    mut request: ProxyRequest,
    context: &RequestContext,
) -> ProxyResponse {
    strip_hop_by_hop(request.headers_mut());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match client.send_request(request, context).await {
        Ok(mut response) => {
            strip_response_hop_by_hop(response.headers_mut());
            tracing::info!(
                app = %client.app_id(),
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                "request completed"
            );
            response
        }
        Err(error) => {
            let status = error_status(&error);
            tracing::warn!(
                app = %client.app_id(),
                method = %method,
                path = %path,
                status = status.as_u16(),
                error = %error,
                "request failed"
            );
            let mut response = Response::new(Bytes::from(error.to_string()));
            *response.status_mut() = status;
            response
        }
    }
}

async fn handle(
    client: Arc<BackendServiceClient>,
    request: Request<Incoming>,
    context: RequestContext,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            let mut response = Response::new(Full::new(Bytes::from_static(b"bad request")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response = proxy(&client, Request::from_parts(parts, body), &context).await;
    Ok(response.map(Full::new))
}

/// Starts the proxy listener on the given address.
///
/// Runs until the listener fails, handling each connection on its own task.
pub async fn start_proxy_server(
    addr: SocketAddr,
    client: Arc<BackendServiceClient>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, app = %client.app_id(), "proxy listening");

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let client = Arc::clone(&client);

        tokio::spawn(async move {
            let context = RequestContext {
                client_address: Some(remote),
                secure: false,
            };
            let service = service_fn(move |request| {
                handle(Arc::clone(&client), request, context.clone())
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "proxy connection error");
            }
        });
    }
}
