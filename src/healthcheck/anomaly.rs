//! Consecutive-result filtering for raw probe announcements.
//!
//! A single failed probe should not take an origin out of rotation, and a
//! single success should not bring it back. Results are forwarded only after
//! `healthy_threshold` consecutive successes or `unhealthy_threshold`
//! consecutive failures; a result in the other direction resets the streak.

use std::sync::Arc;

use dashmap::DashMap;

use crate::origin::Origin;

use super::monitor::HealthStatusListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Streak {
    Healthy(u32),
    Unhealthy(u32),
}

/// Forwards health announcements to a delegate once a streak reaches its threshold.
///
/// Thread-safe via DashMap. Unknown origins start with no streak.
pub struct AnomalyExcludingListener {
    delegate: Arc<dyn HealthStatusListener>,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    streaks: DashMap<Origin, Streak>,
}

impl AnomalyExcludingListener {
    pub fn new(
        delegate: Arc<dyn HealthStatusListener>,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Self {
        Self {
            delegate,
            healthy_threshold,
            unhealthy_threshold,
            streaks: DashMap::new(),
        }
    }

    /// Records one result and returns the new streak length.
    fn record(&self, origin: &Origin, status: Streak) -> u32 {
        let mut streak = self.streaks.entry(origin.clone()).or_insert(status);
        let next = match (*streak, status) {
            (Streak::Healthy(n), Streak::Healthy(_)) => Streak::Healthy(n + 1),
            (Streak::Unhealthy(n), Streak::Unhealthy(_)) => Streak::Unhealthy(n + 1),
            (_, Streak::Healthy(_)) => Streak::Healthy(1),
            (_, Streak::Unhealthy(_)) => Streak::Unhealthy(1),
        };
        *streak = next;
        match next {
            Streak::Healthy(n) | Streak::Unhealthy(n) => n,
        }
    }
}

impl HealthStatusListener for AnomalyExcludingListener {
    fn origin_healthy(&self, origin: &Origin) {
        if self.record(origin, Streak::Healthy(0)) >= self.healthy_threshold {
            self.delegate.origin_healthy(origin);
        }
    }

    fn origin_unhealthy(&self, origin: &Origin) {
        if self.record(origin, Streak::Unhealthy(0)) >= self.unhealthy_threshold {
            self.delegate.origin_unhealthy(origin);
        }
    }

    fn monitoring_ended(&self, origin: &Origin) {
        self.streaks.remove(origin);
        self.delegate.monitoring_ended(origin);
    }
}
