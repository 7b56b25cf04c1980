use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::origin::RemoteHost;

use super::{without_avoided, ActiveOrigins, LoadBalancer, Preferences};

/// Picks the active origin with the fewest ongoing requests.
///
/// Ties rotate round-robin so idle origins share the load.
pub struct BusyConnectionsStrategy {
    origins: Arc<dyn ActiveOrigins>,
    current: AtomicUsize,
}

impl BusyConnectionsStrategy {
    pub fn new(origins: Arc<dyn ActiveOrigins>) -> Self {
        Self {
            origins,
            current: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for BusyConnectionsStrategy {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        let candidates = without_avoided(self.origins.active_origins(), preferences);
        let least = candidates
            .iter()
            .map(|host| host.load_balancing_metric().ongoing_requests)
            .min()?;

        let idlest: Vec<RemoteHost> = candidates
            .into_iter()
            .filter(|host| host.load_balancing_metric().ongoing_requests == least)
            .collect();
        let idx = self.current.fetch_add(1, Ordering::Relaxed) % idlest.len();
        idlest.into_iter().nth(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::remote_host;

    #[test]
    fn test_picks_least_busy_origin() {
        let (a_client, a) = remote_host("a", 9090);
        let (b_client, b) = remote_host("b", 9091);
        let (c_client, c) = remote_host("c", 9092);
        a_client.set_ongoing(5);
        b_client.set_ongoing(1);
        c_client.set_ongoing(3);

        let lb = BusyConnectionsStrategy::new(Arc::new(vec![a, b, c]));
        for _ in 0..3 {
            assert_eq!(lb.choose(&Preferences::default()).unwrap().id().as_str(), "b");
        }
    }

    #[test]
    fn test_ties_rotate() {
        let (_, a) = remote_host("a", 9090);
        let (_, b) = remote_host("b", 9091);
        let lb = BusyConnectionsStrategy::new(Arc::new(vec![a, b]));

        let selections: Vec<String> = (0..4)
            .map(|_| lb.choose(&Preferences::default()).unwrap().id().to_string())
            .collect();
        assert_eq!(selections, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_avoided_origin_is_skipped_even_when_idle() {
        let (a_client, a) = remote_host("a", 9090);
        let (b_client, b) = remote_host("b", 9091);
        a_client.set_ongoing(0);
        b_client.set_ongoing(10);

        let lb = BusyConnectionsStrategy::new(Arc::new(vec![a.clone(), b]));
        let preferences = Preferences {
            preferred_origins: None,
            avoid_origins: vec![a.origin().clone()],
        };
        assert_eq!(lb.choose(&preferences).unwrap().id().as_str(), "b");
    }

    #[test]
    fn test_no_active_origins_returns_none() {
        let lb = BusyConnectionsStrategy::new(Arc::new(Vec::<RemoteHost>::new()));
        assert!(lb.choose(&Preferences::default()).is_none());
    }
}
