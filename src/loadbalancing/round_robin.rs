use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::origin::RemoteHost;

use super::{without_avoided, ActiveOrigins, LoadBalancer, Preferences};

/// Round-robin over the active origins.
///
/// Thread-safe via an atomic counter. Origins already tried for the request
/// are skipped while others remain. Returns None when nothing is active.
pub struct RoundRobinStrategy {
    origins: Arc<dyn ActiveOrigins>,
    current: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new(origins: Arc<dyn ActiveOrigins>) -> Self {
        Self {
            origins,
            current: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinStrategy {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        let candidates = without_avoided(self.origins.active_origins(), preferences);
        if candidates.is_empty() {
            return None;
        }

        let idx = self.current.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.into_iter().nth(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::remote_host;

    fn make_strategy(ids: &[&str]) -> RoundRobinStrategy {
        let hosts: Vec<RemoteHost> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| remote_host(id, 9090 + i as u16).1)
            .collect();
        RoundRobinStrategy::new(Arc::new(hosts))
    }

    fn pick(lb: &RoundRobinStrategy) -> String {
        lb.choose(&Preferences::default()).unwrap().id().to_string()
    }

    // ========== Phase 1: Basic Round-Robin ==========

    #[test]
    fn test_single_origin_always_selected() {
        let lb = make_strategy(&["a"]);
        for _ in 0..5 {
            assert_eq!(pick(&lb), "a");
        }
    }

    #[test]
    fn test_two_origins_alternate() {
        let lb = make_strategy(&["a", "b"]);
        let selections: Vec<String> = (0..4).map(|_| pick(&lb)).collect();
        assert_eq!(selections, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_even_distribution() {
        let lb = make_strategy(&["a", "b", "c"]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..99 {
            *counts.entry(pick(&lb)).or_insert(0) += 1;
        }

        assert_eq!(counts.get("a"), Some(&33));
        assert_eq!(counts.get("b"), Some(&33));
        assert_eq!(counts.get("c"), Some(&33));
    }

    #[test]
    fn test_no_active_origins_returns_none() {
        let lb = make_strategy(&[]);
        assert!(lb.choose(&Preferences::default()).is_none());
    }

    // ========== Phase 2: Avoid preference ==========

    #[test]
    fn test_avoided_origin_is_skipped() {
        let (_, a) = remote_host("a", 9090);
        let (_, b) = remote_host("b", 9091);
        let lb = RoundRobinStrategy::new(Arc::new(vec![a.clone(), b]));
        let preferences = Preferences {
            preferred_origins: None,
            avoid_origins: vec![a.origin().clone()],
        };

        for _ in 0..4 {
            assert_eq!(lb.choose(&preferences).unwrap().id().as_str(), "b");
        }
    }

    // ========== Phase 3: Thread Safety ==========

    #[test]
    fn test_concurrent_selection() {
        use std::thread;

        let lb = Arc::new(make_strategy(&["a", "b", "c"]));
        let mut handles = vec![];

        for _ in 0..10 {
            let lb = Arc::clone(&lb);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    assert!(lb.choose(&Preferences::default()).is_some());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_strategy_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RoundRobinStrategy>();
    }
}
