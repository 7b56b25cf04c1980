//! Hand-written test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use parking_lot::{Mutex, RwLock};

use crate::client::{
    HostClient, HostClientFactory, LoadBalancingMetric, ProxyRequest, ProxyResponse,
    RequestContext,
};
use crate::error::ProxyError;
use crate::healthcheck::{HealthStatusListener, OriginHealthStatusMonitor};
use crate::loadbalancing::{LoadBalancer, Preferences};
use crate::origin::{Origin, OriginsChangeListener, OriginsSnapshot, RemoteHost};
use crate::retry::{RetryDecision, RetryPolicy, RetryPolicyContext};

type Responder = Box<dyn Fn() -> Result<ProxyResponse, ProxyError> + Send + Sync>;

pub fn response(status: u16, headers: &[(&str, &str)], body: &'static str) -> ProxyResponse {
    let mut builder = http::Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Bytes::from_static(body.as_bytes())).unwrap()
}

pub fn request(method: Method, uri: &str) -> ProxyRequest {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

/// What a stub host client saw of one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Host client answering from a script, then from a fallback responder.
pub struct StubHostClient {
    script: Mutex<VecDeque<Result<ProxyResponse, ProxyError>>>,
    fallback: Responder,
    hang: AtomicBool,
    requests: Mutex<Vec<RecordedRequest>>,
    closes: AtomicUsize,
    ongoing: AtomicUsize,
}

impl Default for StubHostClient {
    fn default() -> Self {
        Self::with_responder(|| Ok(response(200, &[], "")))
    }
}

impl StubHostClient {
    pub fn with_responder<F>(fallback: F) -> Self
    where
        F: Fn() -> Result<ProxyResponse, ProxyError> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Box::new(fallback),
            hang: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            ongoing: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ProxyError) -> Self {
        Self::with_responder(move || Err(error.clone()))
    }

    /// Never answers.
    pub fn hanging() -> Self {
        let client = Self::default();
        client.hang.store(true, Ordering::SeqCst);
        client
    }

    pub fn push(&self, result: Result<ProxyResponse, ProxyError>) {
        self.script.lock().push_back(result);
    }

    pub fn set_ongoing(&self, ongoing: usize) {
        self.ongoing.store(ongoing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostClient for StubHostClient {
    async fn send_request(
        &self,
        request: ProxyRequest,
        _context: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        self.requests.lock().push(RecordedRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        });
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => (self.fallback)(),
        }
    }

    fn load_balancing_metric(&self) -> LoadBalancingMetric {
        LoadBalancingMetric {
            ongoing_requests: self.ongoing.load(Ordering::SeqCst),
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out a fresh [`StubHostClient`] per origin and remembering each.
#[derive(Default)]
pub struct StubHostClientFactory {
    created: Mutex<Vec<(Origin, Arc<StubHostClient>)>>,
}

impl StubHostClientFactory {
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Every client created for an origin id, oldest first.
    pub fn clients(&self, origin_id: &str) -> Vec<Arc<StubHostClient>> {
        self.created
            .lock()
            .iter()
            .filter(|(origin, _)| origin.id().as_str() == origin_id)
            .map(|(_, client)| Arc::clone(client))
            .collect()
    }
}

impl HostClientFactory for StubHostClientFactory {
    fn create(&self, origin: &Origin) -> Arc<dyn HostClient> {
        let client = Arc::new(StubHostClient::default());
        self.created.lock().push((origin.clone(), client.clone()));
        client
    }
}

pub fn remote_host(id: &str, port: u16) -> (Arc<StubHostClient>, RemoteHost) {
    let client = Arc::new(StubHostClient::default());
    let host = RemoteHost::new(Origin::new("app", id, "localhost", port), client.clone());
    (client, host)
}

pub fn remote_host_with(id: &str, port: u16, client: StubHostClient) -> (Arc<StubHostClient>, RemoteHost) {
    let client = Arc::new(client);
    let host = RemoteHost::new(Origin::new("app", id, "localhost", port), client.clone());
    (client, host)
}

#[derive(Default)]
pub struct RecordingHealthListener {
    healthy: Mutex<Vec<Origin>>,
    unhealthy: Mutex<Vec<Origin>>,
    ended: Mutex<Vec<Origin>>,
}

impl RecordingHealthListener {
    pub fn healthy(&self) -> Vec<Origin> {
        self.healthy.lock().clone()
    }

    pub fn unhealthy(&self) -> Vec<Origin> {
        self.unhealthy.lock().clone()
    }

    pub fn ended(&self) -> Vec<Origin> {
        self.ended.lock().clone()
    }
}

impl HealthStatusListener for RecordingHealthListener {
    fn origin_healthy(&self, origin: &Origin) {
        self.healthy.lock().push(origin.clone());
    }

    fn origin_unhealthy(&self, origin: &Origin) {
        self.unhealthy.lock().push(origin.clone());
    }

    fn monitoring_ended(&self, origin: &Origin) {
        self.ended.lock().push(origin.clone());
    }
}

/// Monitor that records what it is asked to watch and announces on demand.
#[derive(Default)]
pub struct RecordingMonitor {
    listeners: RwLock<Vec<Arc<dyn HealthStatusListener>>>,
    monitored: Mutex<Vec<Origin>>,
    stopped: Mutex<Vec<Origin>>,
}

impl RecordingMonitor {
    pub fn monitored(&self) -> Vec<Origin> {
        self.monitored.lock().clone()
    }

    pub fn stopped(&self) -> Vec<Origin> {
        self.stopped.lock().clone()
    }

    pub fn announce_healthy(&self, origin: &Origin) {
        for listener in self.listeners.read().iter() {
            listener.origin_healthy(origin);
        }
    }

    pub fn announce_unhealthy(&self, origin: &Origin) {
        for listener in self.listeners.read().iter() {
            listener.origin_unhealthy(origin);
        }
    }
}

impl OriginHealthStatusMonitor for RecordingMonitor {
    fn monitor(&self, origins: &[Origin]) {
        self.monitored.lock().extend_from_slice(origins);
    }

    fn stop_monitoring(&self, origins: &[Origin]) {
        self.stopped.lock().extend_from_slice(origins);
        for origin in origins {
            for listener in self.listeners.read().iter() {
                listener.monitoring_ended(origin);
            }
        }
    }

    fn add_listener(&self, listener: Arc<dyn HealthStatusListener>) {
        self.listeners.write().push(listener);
    }
}

#[derive(Default)]
pub struct RecordingChangeListener {
    snapshots: Mutex<Vec<OriginsSnapshot>>,
}

impl RecordingChangeListener {
    pub fn count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn last(&self) -> Option<OriginsSnapshot> {
        self.snapshots.lock().last().cloned()
    }
}

impl OriginsChangeListener for RecordingChangeListener {
    fn origins_changed(&self, snapshot: &OriginsSnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}

/// Load balancer returning hosts from a queue, then `None`.
#[derive(Default)]
pub struct ScriptedLoadBalancer {
    hosts: Mutex<VecDeque<RemoteHost>>,
    preferences: Mutex<Vec<Preferences>>,
    sticky: bool,
}

impl ScriptedLoadBalancer {
    pub fn new(hosts: Vec<RemoteHost>) -> Self {
        Self {
            hosts: Mutex::new(hosts.into()),
            preferences: Mutex::new(Vec::new()),
            sticky: false,
        }
    }

    pub fn sticky(hosts: Vec<RemoteHost>) -> Self {
        Self {
            sticky: true,
            ..Self::new(hosts)
        }
    }

    /// Preferences passed to every `choose` call so far.
    pub fn preferences(&self) -> Vec<Preferences> {
        self.preferences.lock().clone()
    }
}

impl LoadBalancer for ScriptedLoadBalancer {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        self.preferences.lock().push(preferences.clone());
        self.hosts.lock().pop_front()
    }

    fn is_sticky_session(&self) -> bool {
        self.sticky
    }
}

/// What a scripted retry policy saw of one evaluation.
#[derive(Debug, Clone)]
pub struct RecordedRetry {
    pub app_id: String,
    pub retry_count: usize,
    pub last_error: Option<String>,
    pub previous_origins: Vec<String>,
    pub avoid_origins: Vec<String>,
}

/// Retry policy answering with a fixed decision and recording its inputs.
pub struct ScriptedRetryPolicy {
    should_retry: bool,
    seen: Mutex<Vec<RecordedRetry>>,
}

impl ScriptedRetryPolicy {
    pub fn always() -> Self {
        Self {
            should_retry: true,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn never() -> Self {
        Self {
            should_retry: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<RecordedRetry> {
        self.seen.lock().clone()
    }
}

impl RetryPolicy for ScriptedRetryPolicy {
    fn evaluate(
        &self,
        context: &RetryPolicyContext,
        _load_balancer: &dyn LoadBalancer,
        preferences: &Preferences,
    ) -> RetryDecision {
        self.seen.lock().push(RecordedRetry {
            app_id: context.app_id().to_string(),
            retry_count: context.current_retry_count(),
            last_error: context.last_error().map(ToString::to_string),
            previous_origins: context
                .previously_attempted_origins()
                .iter()
                .map(|host| host.id().to_string())
                .collect(),
            avoid_origins: preferences
                .avoid_origins
                .iter()
                .map(|origin| origin.id().to_string())
                .collect(),
        });
        RetryDecision {
            should_retry: self.should_retry,
            next_origin: None,
        }
    }
}

/// Writes a raw HTTP/1.1 request and reads until the server closes.
/// Returns the status code and the whole response text.
pub async fn http_exchange(addr: SocketAddr, raw_request: &str) -> (u16, String) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw_request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let status_code: u16 = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap()
        .parse()
        .unwrap();
    (status_code, response)
}

/// Simple GET returning the status code and the body.
pub async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    let (status, response) = http_exchange(addr, &request).await;
    let body = response
        .split("\r\n\r\n")
        .nth(1)
        .unwrap_or("")
        .to_string();
    (status, body)
}
