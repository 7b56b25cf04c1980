//! Request dispatch for one backend service.
//!
//! Each request is rewritten once, then dispatched to an origin chosen by the
//! load balancer. A failed dispatch is offered to the retry policy, which
//! decides whether another origin is tried. Successful responses are
//! normalised before they are returned.

use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_LENGTH, HOST, SET_COOKIE, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::error::ProxyError;
use crate::loadbalancing::{LoadBalancer, Preferences};
use crate::metrics::ProxyMetrics;
use crate::origin::{AppId, Origin, RemoteHost};
use crate::retry::{RetryNTimes, RetryPolicy, RetryPolicyContext};

use super::cookies::{request_cookie, sticky_session_cookie, sticky_session_cookie_name};
use super::rewrite::RewriteRuleset;
use super::{ProxyRequest, ProxyResponse, RequestContext};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_STICKY_SESSION_TIMEOUT: Duration = Duration::from_secs(43200);
pub const DEFAULT_ORIGIN_ID_HEADER: &str = "x-origin-id";

/// Dispatches requests for one application to its origins.
pub struct BackendServiceClient {
    app_id: AppId,
    load_balancer: Arc<dyn LoadBalancer>,
    retry_policy: Arc<dyn RetryPolicy>,
    rewrites: RewriteRuleset,
    metrics: Arc<ProxyMetrics>,
    origin_id_header: HeaderName,
    sticky_session_timeout: Duration,
    origin_restriction_cookie: Option<String>,
    override_host_header: bool,
    max_attempts: usize,
}

impl BackendServiceClient {
    pub fn builder(
        app_id: impl Into<AppId>,
        load_balancer: Arc<dyn LoadBalancer>,
        metrics: Arc<ProxyMetrics>,
    ) -> BackendServiceClientBuilder {
        BackendServiceClientBuilder {
            app_id: app_id.into(),
            load_balancer,
            metrics,
            retry_policy: None,
            rewrites: RewriteRuleset::default(),
            origin_id_header: HeaderName::from_static(DEFAULT_ORIGIN_ID_HEADER),
            sticky_session_timeout: DEFAULT_STICKY_SESSION_TIMEOUT,
            origin_restriction_cookie: None,
            override_host_header: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Sends a request to an origin, retrying on other origins as the retry
    /// policy allows. At most `max_attempts` dispatches are made.
    pub async fn send_request(
        &self,
        request: ProxyRequest,
        context: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let request = self.rewrites.apply(request);
        let preferred = self.preferred_origins(&request);
        let mut previous: Vec<RemoteHost> = Vec::new();
        let mut attempt = 0;

        loop {
            if attempt >= self.max_attempts {
                return Err(ProxyError::NoAvailableHosts(self.app_id.clone()));
            }

            let selection = Preferences {
                preferred_origins: preferred.clone(),
                avoid_origins: origins_of(&previous),
            };
            let Some(host) = self.load_balancer.choose(&selection) else {
                let retry_context =
                    RetryPolicyContext::new(&self.app_id, attempt + 1, None, &request, &previous);
                if self.should_retry(&retry_context, &previous) {
                    attempt += 1;
                    continue;
                }
                return Err(ProxyError::NoAvailableHosts(self.app_id.clone()));
            };

            let outgoing = self.prepare(&request, host.origin());
            let is_head = outgoing.method() == Method::HEAD;

            match self.dispatch(&host, outgoing, context).await {
                Ok(response) => return Ok(self.post_process(response, &host, is_head)),
                Err(error) => {
                    tracing::error!(
                        app = %self.app_id,
                        origin = %host.id(),
                        method = %request.method(),
                        uri = %request.uri(),
                        error = %error,
                        "Error handling request"
                    );
                    let retry_context = RetryPolicyContext::new(
                        &self.app_id,
                        attempt + 1,
                        Some(&error),
                        &request,
                        &previous,
                    );
                    let mut tried = previous.clone();
                    tried.push(host);
                    if !self.should_retry(&retry_context, &tried) {
                        return Err(error);
                    }
                    previous = tried;
                    attempt += 1;
                }
            }
        }
    }

    fn should_retry(&self, context: &RetryPolicyContext<'_>, avoid: &[RemoteHost]) -> bool {
        let preferences = Preferences {
            preferred_origins: None,
            avoid_origins: origins_of(avoid),
        };
        self.retry_policy
            .evaluate(context, self.load_balancer.as_ref(), &preferences)
            .should_retry
    }

    /// Restriction cookie first, when one is configured; then the sticky-session cookie.
    fn preferred_origins(&self, request: &ProxyRequest) -> Option<String> {
        self.origin_restriction_cookie
            .as_deref()
            .and_then(|name| request_cookie(request.headers(), name))
            .or_else(|| {
                request_cookie(request.headers(), &sticky_session_cookie_name(&self.app_id))
            })
    }

    fn prepare(&self, request: &ProxyRequest, origin: &Origin) -> ProxyRequest {
        let mut outgoing = copy_request(request);
        if self.override_host_header && !origin.host().trim().is_empty() {
            match HeaderValue::from_str(origin.host()) {
                Ok(host) => {
                    outgoing.headers_mut().insert(HOST, host);
                }
                Err(e) => tracing::warn!(origin = %origin, error = %e, "origin host is not a valid Host header"),
            }
        }
        outgoing
    }

    async fn dispatch(
        &self,
        host: &RemoteHost,
        request: ProxyRequest,
        context: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let mut in_flight = InFlight {
            metrics: &self.metrics,
            origin: host.origin(),
            completed: false,
        };
        let result = host.handle(request, context).await;
        in_flight.completed = true;
        result
    }

    fn post_process(&self, mut response: ProxyResponse, host: &RemoteHost, is_head: bool) -> ProxyResponse {
        if self.load_balancer.is_sticky_session() {
            match sticky_session_cookie(&self.app_id, host.id(), self.sticky_session_timeout) {
                Ok(cookie) => {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
                Err(e) => tracing::warn!(origin = %host.id(), error = %e, "cannot encode sticky session cookie"),
            }
        }

        if is_head || is_bodiless(response.status()) {
            let headers = response.headers_mut();
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            headers.remove(TRANSFER_ENCODING);
            *response.body_mut() = Default::default();
        }

        if is_chunked(&response) && response.headers().contains_key(CONTENT_LENGTH) {
            response.headers_mut().remove(CONTENT_LENGTH);
        }

        match HeaderValue::from_str(host.id().as_str()) {
            Ok(id) => {
                response.headers_mut().insert(self.origin_id_header.clone(), id);
            }
            Err(e) => tracing::warn!(origin = %host.id(), error = %e, "origin id is not a valid header value"),
        }

        if response.status().as_u16() >= 400 {
            self.metrics.record_error_response(response.status().as_u16());
        }

        response
    }
}

/// Records a cancelled request if dropped before the origin answered.
struct InFlight<'a> {
    metrics: &'a ProxyMetrics,
    origin: &'a Origin,
    completed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.metrics.record_request_cancelled(self.origin);
            tracing::debug!(origin = %self.origin, "request cancelled");
        }
    }
}

fn origins_of(hosts: &[RemoteHost]) -> Vec<Origin> {
    hosts.iter().map(|host| host.origin().clone()).collect()
}

fn is_bodiless(status: StatusCode) -> bool {
    status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || status.is_informational()
}

fn is_chunked(response: &ProxyResponse) -> bool {
    response
        .headers()
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn copy_request(request: &ProxyRequest) -> ProxyRequest {
    let mut copy = http::Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}

pub struct BackendServiceClientBuilder {
    app_id: AppId,
    load_balancer: Arc<dyn LoadBalancer>,
    metrics: Arc<ProxyMetrics>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    rewrites: RewriteRuleset,
    origin_id_header: HeaderName,
    sticky_session_timeout: Duration,
    origin_restriction_cookie: Option<String>,
    override_host_header: bool,
    max_attempts: usize,
}

impl BackendServiceClientBuilder {
    /// Defaults to [`RetryNTimes`] with the configured attempt count.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn rewrites(mut self, rewrites: RewriteRuleset) -> Self {
        self.rewrites = rewrites;
        self
    }

    pub fn origin_id_header(mut self, header: HeaderName) -> Self {
        self.origin_id_header = header;
        self
    }

    pub fn sticky_session_timeout(mut self, timeout: Duration) -> Self {
        self.sticky_session_timeout = timeout;
        self
    }

    pub fn origin_restriction_cookie(mut self, name: Option<String>) -> Self {
        self.origin_restriction_cookie = name;
        self
    }

    pub fn override_host_header(mut self, enabled: bool) -> Self {
        self.override_host_header = enabled;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn build(self) -> BackendServiceClient {
        let max_attempts = self.max_attempts;
        BackendServiceClient {
            app_id: self.app_id,
            load_balancer: self.load_balancer,
            retry_policy: self
                .retry_policy
                .unwrap_or_else(|| Arc::new(RetryNTimes::new(max_attempts))),
            rewrites: self.rewrites,
            metrics: self.metrics,
            origin_id_header: self.origin_id_header,
            sticky_session_timeout: self.sticky_session_timeout,
            origin_restriction_cookie: self.origin_restriction_cookie,
            override_host_header: self.override_host_header,
            max_attempts,
        }
    }
}
