use std::sync::Arc;

use crate::origin::RemoteHost;

use super::{ActiveOrigins, LoadBalancer, Preferences};

/// Routes a request back to the origin named in its sticky-session cookie
/// while that origin is active and not yet tried for the request; otherwise
/// defers to the delegate.
pub struct StickySessionStrategy {
    origins: Arc<dyn ActiveOrigins>,
    delegate: Arc<dyn LoadBalancer>,
}

impl StickySessionStrategy {
    pub fn new(origins: Arc<dyn ActiveOrigins>, delegate: Arc<dyn LoadBalancer>) -> Self {
        Self { origins, delegate }
    }
}

impl LoadBalancer for StickySessionStrategy {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        if let Some(preferred) = preferences.preferred_origins.as_deref() {
            let sticky = self
                .origins
                .active_origins()
                .into_iter()
                .find(|host| host.id().as_str() == preferred && !preferences.avoids(host));
            if sticky.is_some() {
                return sticky;
            }
        }
        self.delegate.choose(preferences)
    }

    fn is_sticky_session(&self) -> bool {
        true
    }
}
