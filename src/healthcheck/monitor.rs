//! Health status monitors.
//!
//! A monitor probes the origins it is told to watch and announces the raw
//! outcome of every probe to its listeners.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::origin::Origin;

use super::probe::{HealthCheck, HealthStatus};

/// Receives health announcements for monitored origins.
pub trait HealthStatusListener: Send + Sync {
    fn origin_healthy(&self, origin: &Origin);

    fn origin_unhealthy(&self, origin: &Origin);

    /// The origin is no longer monitored; any per-origin bookkeeping can go.
    fn monitoring_ended(&self, _origin: &Origin) {}
}

/// Watches a changing set of origins.
pub trait OriginHealthStatusMonitor: Send + Sync {
    fn monitor(&self, origins: &[Origin]);

    fn stop_monitoring(&self, origins: &[Origin]);

    fn add_listener(&self, listener: Arc<dyn HealthStatusListener>);

    /// True for the monitor used when health checking is switched off.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Monitor used when no health check is configured. Never announces anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOriginHealthStatusMonitor;

impl OriginHealthStatusMonitor for NoOriginHealthStatusMonitor {
    fn monitor(&self, _origins: &[Origin]) {}

    fn stop_monitoring(&self, _origins: &[Origin]) {}

    fn add_listener(&self, _listener: Arc<dyn HealthStatusListener>) {}

    fn is_noop(&self) -> bool {
        true
    }
}

struct MonitorState {
    origins: DashSet<Origin>,
    listeners: RwLock<Vec<Arc<dyn HealthStatusListener>>>,
    check: Arc<dyn HealthCheck>,
}

impl MonitorState {
    async fn probe(&self, origin: Origin) {
        let status = self.check.check(&origin).await;

        // Stopped while the probe was in flight.
        if !self.origins.contains(&origin) {
            return;
        }

        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            match status {
                HealthStatus::Healthy => listener.origin_healthy(&origin),
                HealthStatus::Unhealthy => listener.origin_unhealthy(&origin),
            }
        }
    }
}

/// Probes every monitored origin on a fixed schedule.
pub struct ScheduledOriginHealthStatusMonitor {
    state: Arc<MonitorState>,
    initial_delay: Duration,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledOriginHealthStatusMonitor {
    pub fn new(check: Arc<dyn HealthCheck>, initial_delay: Duration, interval: Duration) -> Self {
        Self {
            state: Arc::new(MonitorState {
                origins: DashSet::new(),
                listeners: RwLock::new(Vec::new()),
                check,
            }),
            initial_delay,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Starts the probe schedule. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let state = Arc::clone(&self.state);
        let initial_delay = self.initial_delay;
        let period = self.interval.max(Duration::from_millis(1));

        *task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let origins: Vec<Origin> = state.origins.iter().map(|o| o.key().clone()).collect();
                for origin in origins {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move { state.probe(origin).await });
                }
            }
        }));
        tracing::info!(
            interval_ms = period.as_millis() as u64,
            "scheduled health monitor started"
        );
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("scheduled health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn monitored(&self) -> Vec<Origin> {
        self.state.origins.iter().map(|o| o.key().clone()).collect()
    }
}

impl OriginHealthStatusMonitor for ScheduledOriginHealthStatusMonitor {
    fn monitor(&self, origins: &[Origin]) {
        let running = self.is_running();
        for origin in origins {
            if self.state.origins.insert(origin.clone()) && running {
                let state = Arc::clone(&self.state);
                let origin = origin.clone();
                tokio::spawn(async move { state.probe(origin).await });
            }
        }
    }

    fn stop_monitoring(&self, origins: &[Origin]) {
        let listeners = self.state.listeners.read().clone();
        for origin in origins {
            for listener in &listeners {
                listener.monitoring_ended(origin);
            }
            self.state.origins.remove(origin);
            self.state.check.forget(origin);
        }
    }

    fn add_listener(&self, listener: Arc<dyn HealthStatusListener>) {
        self.state.listeners.write().push(listener);
    }
}

impl Drop for ScheduledOriginHealthStatusMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healthcheck::UrlHealthCheck;
    use crate::testing::{RecordingHealthListener, StubHostClientFactory};
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Reports every origin whose port is in the healthy set as healthy.
    struct PortCheck {
        healthy_ports: HashSet<u16>,
    }

    #[async_trait]
    impl HealthCheck for PortCheck {
        async fn check(&self, origin: &Origin) -> HealthStatus {
            if self.healthy_ports.contains(&origin.port()) {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            }
        }
    }

    fn make_monitor(healthy_ports: &[u16]) -> ScheduledOriginHealthStatusMonitor {
        let check = Arc::new(PortCheck {
            healthy_ports: healthy_ports.iter().copied().collect(),
        });
        ScheduledOriginHealthStatusMonitor::new(
            check,
            Duration::from_millis(0),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_noop_monitor_reports_noop() {
        assert!(NoOriginHealthStatusMonitor.is_noop());
    }

    #[test]
    fn test_monitor_tracks_origins() {
        let monitor = make_monitor(&[]);
        let a = Origin::new("app", "app-01", "localhost", 9090);
        let b = Origin::new("app", "app-02", "localhost", 9091);

        monitor.monitor(&[a.clone(), b.clone()]);
        assert_eq!(monitor.monitored().len(), 2);

        monitor.stop_monitoring(&[a]);
        assert_eq!(monitor.monitored(), vec![b]);
    }

    #[test]
    fn test_stop_monitoring_announces_monitoring_ended() {
        let monitor = make_monitor(&[]);
        let listener = Arc::new(RecordingHealthListener::default());
        monitor.add_listener(listener.clone());
        let origin = Origin::new("app", "app-01", "localhost", 9090);

        monitor.monitor(&[origin.clone()]);
        monitor.stop_monitoring(&[origin.clone()]);

        assert_eq!(listener.ended(), vec![origin]);
    }

    #[tokio::test]
    async fn test_scheduled_probes_announce_results() {
        let monitor = make_monitor(&[9090]);
        let listener = Arc::new(RecordingHealthListener::default());
        monitor.add_listener(listener.clone());

        let up = Origin::new("app", "app-01", "localhost", 9090);
        let down = Origin::new("app", "app-02", "localhost", 9091);
        monitor.monitor(&[up.clone(), down.clone()]);
        monitor.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop();

        assert!(listener.healthy().contains(&up));
        assert!(listener.unhealthy().contains(&down));
        assert!(!listener.healthy().contains(&down));
    }

    #[tokio::test]
    async fn test_stopped_origins_are_not_probed() {
        let monitor = make_monitor(&[9090]);
        let listener = Arc::new(RecordingHealthListener::default());
        monitor.add_listener(listener.clone());

        let origin = Origin::new("app", "app-01", "localhost", 9090);
        monitor.monitor(&[origin.clone()]);
        monitor.stop_monitoring(&[origin]);
        monitor.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.stop();

        assert!(listener.healthy().is_empty());
    }

    #[tokio::test]
    async fn test_stop_monitoring_releases_health_check_client() {
        let factory = Arc::new(StubHostClientFactory::default());
        let check = Arc::new(UrlHealthCheck::new("/status", Duration::from_secs(1), factory.clone()));
        let monitor = ScheduledOriginHealthStatusMonitor::new(
            check,
            Duration::from_millis(0),
            Duration::from_millis(20),
        );
        let listener = Arc::new(RecordingHealthListener::default());
        monitor.add_listener(listener.clone());
        let origin = Origin::new("app", "app-01", "localhost", 9090);

        monitor.start();
        monitor.monitor(&[origin.clone()]);
        tokio::time::timeout(Duration::from_secs(1), async {
            while listener.healthy().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        monitor.stop();
        monitor.stop_monitoring(&[origin]);

        assert_eq!(factory.clients("app-01")[0].close_count(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let monitor = make_monitor(&[]);
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_monitor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScheduledOriginHealthStatusMonitor>();
        assert_send_sync::<NoOriginHealthStatusMonitor>();
    }
}
