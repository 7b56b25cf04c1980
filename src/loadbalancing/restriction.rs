use std::sync::Arc;

use rand::Rng;
use regex::Regex;

use crate::origin::RemoteHost;

use super::{ActiveOrigins, LoadBalancer, Preferences};

type IndexPicker = Box<dyn Fn(usize) -> usize + Send + Sync>;

/// Restricts selection to origins whose ids match the patterns in the
/// restriction cookie.
///
/// The cookie holds comma-separated regular expressions, each matched
/// against the whole origin id. A random matching origin is chosen. If no
/// origin matches, nothing is chosen. If any pattern is invalid, a random
/// active origin is chosen. Requests without the cookie go to the delegate.
pub struct OriginRestrictionStrategy {
    origins: Arc<dyn ActiveOrigins>,
    delegate: Arc<dyn LoadBalancer>,
    pick: IndexPicker,
}

impl OriginRestrictionStrategy {
    pub fn new(origins: Arc<dyn ActiveOrigins>, delegate: Arc<dyn LoadBalancer>) -> Self {
        Self::with_picker(origins, delegate, |len| rand::thread_rng().gen_range(0..len))
    }

    /// Uses `pick(len)` instead of a random index.
    pub fn with_picker<F>(origins: Arc<dyn ActiveOrigins>, delegate: Arc<dyn LoadBalancer>, pick: F) -> Self
    where
        F: Fn(usize) -> usize + Send + Sync + 'static,
    {
        Self {
            origins,
            delegate,
            pick: Box::new(pick),
        }
    }

    fn pick_from(&self, mut hosts: Vec<RemoteHost>) -> Option<RemoteHost> {
        if hosts.is_empty() {
            return None;
        }
        let idx = (self.pick)(hosts.len()) % hosts.len();
        Some(hosts.swap_remove(idx))
    }
}

fn compile(cookie: &str) -> Result<Vec<Regex>, regex::Error> {
    cookie
        .split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
        .collect()
}

impl LoadBalancer for OriginRestrictionStrategy {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        let Some(cookie) = preferences.preferred_origins.as_deref() else {
            return self.delegate.choose(preferences);
        };

        let active = self.origins.active_origins();
        match compile(cookie) {
            Ok(patterns) => {
                let matching = active
                    .into_iter()
                    .filter(|host| patterns.iter().any(|p| p.is_match(host.id().as_str())))
                    .collect();
                self.pick_from(matching)
            }
            Err(e) => {
                tracing::error!(value = %cookie, error = %e, "Invalid origin restriction cookie value");
                self.pick_from(active)
            }
        }
    }
}
