//! Request dispatch: per-origin host clients and the retrying backend service client.

mod backend_service_client;
mod cookies;
mod host_client;
mod rewrite;

pub use backend_service_client::{
    BackendServiceClient, BackendServiceClientBuilder, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_ORIGIN_ID_HEADER, DEFAULT_STICKY_SESSION_TIMEOUT,
};
pub use cookies::{request_cookie, sticky_session_cookie, sticky_session_cookie_name};
pub use host_client::{
    HostClient, HostClientFactory, HttpClientSettings, HttpHostClient, HttpHostClientFactory,
    LoadBalancingMetric, ProxyRequest, ProxyResponse, RequestContext,
};
pub use rewrite::{RewriteConfig, RewriteRule, RewriteRuleset};
