//! Retry decisions for failed dispatch attempts.

mod retry_n_times;

use crate::client::ProxyRequest;
use crate::error::ProxyError;
use crate::loadbalancing::{LoadBalancer, Preferences};
use crate::origin::{AppId, RemoteHost};

pub use retry_n_times::RetryNTimes;

/// What the retry policy gets to see about a failed attempt.
///
/// Built fresh for every decision and borrowed from the dispatch loop.
#[derive(Debug)]
pub struct RetryPolicyContext<'a> {
    app_id: &'a AppId,
    retry_count: usize,
    last_error: Option<&'a ProxyError>,
    request: &'a ProxyRequest,
    previous_origins: &'a [RemoteHost],
}

impl<'a> RetryPolicyContext<'a> {
    pub fn new(
        app_id: &'a AppId,
        retry_count: usize,
        last_error: Option<&'a ProxyError>,
        request: &'a ProxyRequest,
        previous_origins: &'a [RemoteHost],
    ) -> Self {
        Self {
            app_id,
            retry_count,
            last_error,
            request,
            previous_origins,
        }
    }

    pub fn app_id(&self) -> &AppId {
        self.app_id
    }

    /// Number of attempts made so far, this one included.
    pub fn current_retry_count(&self) -> usize {
        self.retry_count
    }

    /// The failure of this attempt; `None` when no origin could be selected.
    pub fn last_error(&self) -> Option<&ProxyError> {
        self.last_error
    }

    pub fn current_request(&self) -> &ProxyRequest {
        self.request
    }

    /// Origins tried before this attempt.
    pub fn previously_attempted_origins(&self) -> &[RemoteHost] {
        self.previous_origins
    }
}

/// Outcome of a retry evaluation.
#[derive(Debug, Clone, Default)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Origin the policy would try next, if it found an untried one.
    pub next_origin: Option<RemoteHost>,
}

/// Decides whether a failed attempt is retried.
pub trait RetryPolicy: Send + Sync {
    fn evaluate(
        &self,
        context: &RetryPolicyContext<'_>,
        load_balancer: &dyn LoadBalancer,
        preferences: &Preferences,
    ) -> RetryDecision;
}
