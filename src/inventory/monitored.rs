//! An origin as tracked by the inventory.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::HostClient;
use crate::healthcheck::OriginHealthStatusMonitor;
use crate::metrics::{OriginStatusGauge, ProxyMetrics};
use crate::origin::{Origin, RemoteHost};

use super::state::{OriginEvent, OriginState, Transition};

/// Tracked origin: its host client, current state and status gauge.
///
/// Owned by the inventory's worker. State is behind a mutex only so that
/// snapshots can be built from a shared reference.
pub(crate) struct MonitoredOrigin {
    origin: Origin,
    client: Arc<dyn HostClient>,
    state: Mutex<OriginState>,
    gauge: OriginStatusGauge,
}

impl MonitoredOrigin {
    pub(crate) fn new(
        origin: Origin,
        client: Arc<dyn HostClient>,
        initial_state: OriginState,
        metrics: &ProxyMetrics,
    ) -> Self {
        let gauge = metrics.origin_status_gauge(&origin);
        gauge.set(initial_state.gauge_value());
        Self {
            origin,
            client,
            state: Mutex::new(initial_state),
            gauge,
        }
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.origin
    }

    pub(crate) fn state(&self) -> OriginState {
        *self.state.lock()
    }

    pub(crate) fn remote_host(&self) -> RemoteHost {
        RemoteHost::new(self.origin.clone(), Arc::clone(&self.client))
    }

    /// Applies an event, returning the transition if the state changed.
    pub(crate) fn apply(&self, event: OriginEvent) -> Option<Transition> {
        let mut state = self.state.lock();
        let to = state.on(event)?;
        let transition = Transition { from: *state, to };
        *state = to;
        self.gauge.set(to.gauge_value());
        Some(transition)
    }

    pub(crate) fn start_monitoring(&self, monitor: &dyn OriginHealthStatusMonitor) {
        monitor.monitor(std::slice::from_ref(&self.origin));
    }

    pub(crate) fn stop_monitoring(&self, monitor: &dyn OriginHealthStatusMonitor) {
        monitor.stop_monitoring(std::slice::from_ref(&self.origin));
    }

    /// Stops monitoring, deregisters the gauge and closes the host client.
    pub(crate) fn close(&self, monitor: &dyn OriginHealthStatusMonitor) {
        self.stop_monitoring(monitor);
        self.gauge.delete();
        self.client.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healthcheck::NoOriginHealthStatusMonitor;
    use crate::testing::StubHostClient;

    fn make_monitored(metrics: &ProxyMetrics) -> (Arc<StubHostClient>, MonitoredOrigin) {
        let client = Arc::new(StubHostClient::default());
        let origin = Origin::new("app", "app-01", "localhost", 9090);
        let monitored = MonitoredOrigin::new(origin, client.clone(), OriginState::Active, metrics);
        (client, monitored)
    }

    #[test]
    fn test_new_origin_reports_initial_state() {
        let metrics = ProxyMetrics::new().unwrap();
        let (_client, monitored) = make_monitored(&metrics);
        assert_eq!(monitored.state(), OriginState::Active);
        assert_eq!(metrics.origin_status("app", "app-01"), Some(1));
    }

    #[test]
    fn test_apply_updates_state_and_gauge() {
        let metrics = ProxyMetrics::new().unwrap();
        let (_client, monitored) = make_monitored(&metrics);

        let transition = monitored.apply(OriginEvent::Disable).unwrap();
        assert_eq!(transition.from, OriginState::Active);
        assert_eq!(transition.to, OriginState::Disabled);
        assert_eq!(metrics.origin_status("app", "app-01"), Some(-1));
    }

    #[test]
    fn test_inapplicable_event_changes_nothing() {
        let metrics = ProxyMetrics::new().unwrap();
        let (_client, monitored) = make_monitored(&metrics);
        assert_eq!(monitored.apply(OriginEvent::Enable), None);
        assert_eq!(monitored.state(), OriginState::Active);
    }

    #[test]
    fn test_close_releases_resources() {
        let metrics = ProxyMetrics::new().unwrap();
        let (client, monitored) = make_monitored(&metrics);

        monitored.close(&NoOriginHealthStatusMonitor);

        assert_eq!(client.close_count(), 1);
        assert_eq!(metrics.origin_status("app", "app-01"), None);
    }
}
