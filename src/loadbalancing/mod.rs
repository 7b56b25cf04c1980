//! Origin selection.
//!
//! Strategies choose one [`RemoteHost`] out of the currently active origins,
//! guided by the [`Preferences`] the dispatcher derives from each request.

mod busy_connections;
mod restriction;
mod round_robin;
mod sticky;

use std::sync::Arc;

use crate::origin::{Origin, RemoteHost};

pub use busy_connections::BusyConnectionsStrategy;
pub use restriction::OriginRestrictionStrategy;
pub use round_robin::RoundRobinStrategy;
pub use sticky::StickySessionStrategy;

/// Request-derived hints for origin selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    /// Origin id or restriction pattern taken from a request cookie.
    pub preferred_origins: Option<String>,
    /// Origins already tried for this request.
    pub avoid_origins: Vec<Origin>,
}

impl Preferences {
    pub fn avoids(&self, host: &RemoteHost) -> bool {
        self.avoid_origins.iter().any(|o| o == host.origin())
    }
}

/// Chooses the origin for a request.
pub trait LoadBalancer: Send + Sync {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost>;

    /// True when responses should carry the sticky-session cookie.
    fn is_sticky_session(&self) -> bool {
        false
    }
}

/// Source of the origins currently eligible for traffic.
pub trait ActiveOrigins: Send + Sync {
    fn active_origins(&self) -> Vec<RemoteHost>;
}

impl ActiveOrigins for Vec<RemoteHost> {
    fn active_origins(&self) -> Vec<RemoteHost> {
        self.clone()
    }
}

/// Drops avoided hosts unless that would leave nothing to choose from.
pub(crate) fn without_avoided(hosts: Vec<RemoteHost>, preferences: &Preferences) -> Vec<RemoteHost> {
    if preferences.avoid_origins.is_empty() {
        return hosts;
    }
    let (avoided, remaining): (Vec<_>, Vec<_>) =
        hosts.into_iter().partition(|host| preferences.avoids(host));
    if remaining.is_empty() {
        avoided
    } else {
        remaining
    }
}

/// Wraps the configured strategy for sticky sessions or, failing that,
/// origin restriction. The two are never combined.
pub fn decorate(
    strategy: Arc<dyn LoadBalancer>,
    origins: Arc<dyn ActiveOrigins>,
    sticky_sessions: bool,
    origin_restriction_cookie: Option<&str>,
) -> Arc<dyn LoadBalancer> {
    if sticky_sessions {
        return Arc::new(StickySessionStrategy::new(origins, strategy));
    }
    match origin_restriction_cookie {
        Some(cookie) => {
            tracing::info!(cookie, "origin restriction applies when the cookie is sent");
            Arc::new(OriginRestrictionStrategy::new(origins, strategy))
        }
        None => {
            tracing::info!("origin restriction cookie not configured");
            strategy
        }
    }
}
