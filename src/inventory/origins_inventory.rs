//! The origins inventory for one application.
//!
//! Every mutation (reconciliation, health events, admin commands, close) is
//! queued and applied by a single worker task, so changes never interleave.
//! Readers load an immutable map through `ArcSwap` and never wait on the
//! worker; they may see the state from just before the latest queued event.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::HostClientFactory;
use crate::error::InventoryError;
use crate::healthcheck::{
    AnomalyExcludingListener, HealthStatusListener, NoOriginHealthStatusMonitor,
    OriginHealthStatusMonitor,
};
use crate::loadbalancing::ActiveOrigins;
use crate::metrics::ProxyMetrics;
use crate::origin::{AppId, Origin, OriginId, OriginsChangeListener, OriginsSnapshot, RemoteHost};

use super::commands::{EventBus, OriginsCommand};
use super::monitored::MonitoredOrigin;
use super::state::{OriginEvent, OriginState, Transition};

type OriginMap = BTreeMap<OriginId, Arc<MonitoredOrigin>>;

/// Tuning for a new inventory.
#[derive(Debug, Clone, Copy)]
pub struct InventoryOptions {
    /// State of newly registered origins.
    pub initial_state: OriginState,
    /// Consecutive successful probes before an origin is reported healthy.
    pub healthy_threshold: u32,
    /// Consecutive failed probes before an origin is reported unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for InventoryOptions {
    fn default() -> Self {
        Self {
            initial_state: OriginState::Active,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

enum InventoryEvent {
    SetOrigins(Vec<Origin>),
    Health(Origin, OriginEvent),
    Command(OriginsCommand),
    Close,
    Flush(oneshot::Sender<()>),
}

/// State shared between the handle and the worker.
struct Inner {
    app_id: AppId,
    origins: ArcSwap<OriginMap>,
    listeners: RwLock<Vec<Arc<dyn OriginsChangeListener>>>,
    closed: AtomicBool,
    monitor: Arc<dyn OriginHealthStatusMonitor>,
    factory: Arc<dyn HostClientFactory>,
    metrics: Arc<ProxyMetrics>,
    bus: Option<EventBus>,
    bus_subscription: Mutex<Option<JoinHandle<()>>>,
    initial_state: OriginState,
}

impl Inner {
    fn snapshot(&self) -> OriginsSnapshot {
        let origins = self.origins.load();
        let mut active = Vec::new();
        let mut inactive = Vec::new();
        let mut disabled = Vec::new();
        for monitored in origins.values() {
            let host = monitored.remote_host();
            match monitored.state() {
                OriginState::Active => active.push(host),
                OriginState::Inactive => inactive.push(host),
                OriginState::Disabled => disabled.push(host),
            }
        }
        OriginsSnapshot::new(self.app_id.clone(), active, inactive, disabled)
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.origins_changed(&snapshot);
        }
        if let Some(bus) = &self.bus {
            bus.post_snapshot(snapshot);
        }
    }

    fn register(&self, origin: &Origin) -> Arc<MonitoredOrigin> {
        let client = self.factory.create(origin);
        let monitored = Arc::new(MonitoredOrigin::new(
            origin.clone(),
            client,
            self.initial_state,
            &self.metrics,
        ));
        monitored.start_monitoring(self.monitor.as_ref());
        monitored
    }

    fn reconcile(&self, desired: Vec<Origin>) {
        let current = self.origins.load_full();
        let desired: BTreeMap<OriginId, Origin> = desired
            .into_iter()
            .map(|origin| (origin.id().clone(), origin))
            .collect();

        let mut next = OriginMap::new();
        let mut changed = false;

        for (id, origin) in &desired {
            match current.get(id) {
                None => {
                    next.insert(id.clone(), self.register(origin));
                    tracing::info!(app = %self.app_id, origin = %id, "New origin added and activated");
                    changed = true;
                }
                Some(existing) if existing.origin() != origin => {
                    existing.close(self.monitor.as_ref());
                    next.insert(id.clone(), self.register(origin));
                    tracing::info!(app = %self.app_id, origin = %origin, "Existing origin has been updated");
                    changed = true;
                }
                Some(existing) => {
                    next.insert(id.clone(), Arc::clone(existing));
                    tracing::debug!(app = %self.app_id, origin = %id, "Existing origin has been left unchanged");
                }
            }
        }

        for (id, existing) in current.iter() {
            if !desired.contains_key(id) {
                existing.close(self.monitor.as_ref());
                tracing::info!(app = %self.app_id, origin = %id, "Existing origin has been removed");
                changed = true;
            }
        }

        self.origins.store(Arc::new(next));
        if changed {
            self.notify();
        }
    }

    fn apply(&self, origin_id: &OriginId, event: OriginEvent) {
        let origins = self.origins.load();
        let Some(monitored) = origins.get(origin_id) else {
            return;
        };
        if let Some(transition) = monitored.apply(event) {
            self.on_transition(monitored, transition);
        }
    }

    fn on_transition(&self, monitored: &MonitoredOrigin, transition: Transition) {
        tracing::info!(
            origin = %format!("{}={}", self.app_id, monitored.origin().id()),
            change = %transition,
            "Origin state change"
        );
        if transition.stops_monitoring() {
            monitored.stop_monitoring(self.monitor.as_ref());
        } else if transition.starts_monitoring() {
            monitored.start_monitoring(self.monitor.as_ref());
        }
        self.notify();
    }

    fn on_health(&self, origin: &Origin, event: OriginEvent) {
        // Stale announcements for a replaced origin carry the old address.
        let tracked = self
            .origins
            .load()
            .get(origin.id())
            .is_some_and(|monitored| monitored.origin() == origin);
        if tracked {
            self.apply(origin.id(), event);
        }
    }

    fn on_command(&self, command: OriginsCommand) {
        if !command.is_for(&self.app_id) {
            return;
        }
        match command {
            OriginsCommand::EnableOrigin { origin_id, .. } => {
                self.apply(&origin_id, OriginEvent::Enable);
                // Nothing will ever probe the origin back to ACTIVE.
                if self.monitor.is_noop() {
                    self.apply(&origin_id, OriginEvent::Healthy);
                }
            }
            OriginsCommand::DisableOrigin { origin_id, .. } => {
                self.apply(&origin_id, OriginEvent::Disable)
            }
            OriginsCommand::GetOriginsInventorySnapshot { .. } => self.notify(),
        }
    }

    fn shutdown(&self) {
        let origins = self.origins.swap(Arc::new(OriginMap::new()));
        for (id, monitored) in origins.iter() {
            monitored.close(self.monitor.as_ref());
            tracing::info!(app = %self.app_id, origin = %id, "Existing origin has been removed");
        }
        self.notify();
        if let Some(subscription) = self.bus_subscription.lock().take() {
            subscription.abort();
        }
        tracing::info!(app = %self.app_id, "origins inventory closed");
    }
}

async fn run(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<InventoryEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            InventoryEvent::SetOrigins(origins) => inner.reconcile(origins),
            InventoryEvent::Health(origin, event) => inner.on_health(&origin, event),
            InventoryEvent::Command(command) => inner.on_command(command),
            InventoryEvent::Flush(done) => {
                let _ = done.send(());
            }
            InventoryEvent::Close => {
                inner.shutdown();
                break;
            }
        }
    }
}

/// Feeds probe results from the health monitor into the inventory's queue.
struct InventoryHealthListener {
    events: mpsc::UnboundedSender<InventoryEvent>,
}

impl HealthStatusListener for InventoryHealthListener {
    fn origin_healthy(&self, origin: &Origin) {
        let _ = self
            .events
            .send(InventoryEvent::Health(origin.clone(), OriginEvent::Healthy));
    }

    fn origin_unhealthy(&self, origin: &Origin) {
        let _ = self
            .events
            .send(InventoryEvent::Health(origin.clone(), OriginEvent::Unhealthy));
    }
}

/// Tracks the live origins of one application and their states.
///
/// Must be created within a tokio runtime: construction spawns the worker
/// task and, with an event bus, a task forwarding bus commands.
pub struct OriginsInventory {
    inner: Arc<Inner>,
    events: mpsc::UnboundedSender<InventoryEvent>,
}

impl OriginsInventory {
    pub fn builder(
        app_id: impl Into<AppId>,
        factory: Arc<dyn HostClientFactory>,
        metrics: Arc<ProxyMetrics>,
    ) -> OriginsInventoryBuilder {
        OriginsInventoryBuilder {
            app_id: app_id.into(),
            factory,
            metrics,
            monitor: Arc::new(NoOriginHealthStatusMonitor),
            bus: None,
            options: InventoryOptions::default(),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.inner.app_id
    }

    /// Queues a reconciliation against `origins`.
    ///
    /// An empty set is rejected here rather than queued; use
    /// [`OriginsInventory::close`] to drop every origin. So is a set reusing
    /// an origin id or naming another application.
    pub fn set_origins(&self, origins: Vec<Origin>) -> Result<(), InventoryError> {
        if origins.is_empty() {
            return Err(InventoryError::EmptyOrigins);
        }
        self.check_origins(&origins)?;
        if self.closed() {
            return Err(InventoryError::Closed);
        }
        self.send(InventoryEvent::SetOrigins(origins))
    }

    fn check_origins(&self, origins: &[Origin]) -> Result<(), InventoryError> {
        let mut ids = HashSet::new();
        for origin in origins {
            if origin.app_id() != &self.inner.app_id {
                return Err(InventoryError::ForeignOrigin {
                    origin: origin.id().clone(),
                    found: origin.app_id().clone(),
                    expected: self.inner.app_id.clone(),
                });
            }
            if !ids.insert(origin.id()) {
                return Err(InventoryError::DuplicateOrigin(origin.id().clone()));
            }
        }
        Ok(())
    }

    /// Queues a healthy event. Ignored when health checking is off.
    pub fn origin_healthy(&self, origin: &Origin) {
        self.health_event(origin, OriginEvent::Healthy);
    }

    /// Queues an unhealthy event. Ignored when health checking is off.
    pub fn origin_unhealthy(&self, origin: &Origin) {
        self.health_event(origin, OriginEvent::Unhealthy);
    }

    fn health_event(&self, origin: &Origin, event: OriginEvent) {
        if self.inner.monitor.is_noop() {
            return;
        }
        let _ = self.send(InventoryEvent::Health(origin.clone(), event));
    }

    /// Queues an admin command. Commands for other applications are dropped.
    pub fn on_command(&self, command: OriginsCommand) {
        if command.is_for(&self.inner.app_id) {
            let _ = self.send(InventoryEvent::Command(command));
        }
    }

    /// Registers a listener called with every snapshot, on the worker task.
    pub fn add_origins_change_listener(&self, listener: Arc<dyn OriginsChangeListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Queues the teardown of every origin. Only the first call has an effect.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.events.send(InventoryEvent::Close);
        }
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once every event queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, applied) = oneshot::channel();
        if self.events.send(InventoryEvent::Flush(done)).is_ok() {
            // A dropped sender means the worker has stopped; nothing is pending.
            let _ = applied.await;
        }
    }

    pub fn origin_count(&self, state: OriginState) -> usize {
        self.inner
            .origins
            .load()
            .values()
            .filter(|monitored| monitored.state() == state)
            .count()
    }

    pub fn origins(&self) -> Vec<Origin> {
        self.inner
            .origins
            .load()
            .values()
            .map(|monitored| monitored.origin().clone())
            .collect()
    }

    pub fn snapshot(&self) -> OriginsSnapshot {
        self.inner.snapshot()
    }

    fn send(&self, event: InventoryEvent) -> Result<(), InventoryError> {
        self.events.send(event).map_err(|_| InventoryError::Closed)
    }
}

impl ActiveOrigins for OriginsInventory {
    fn active_origins(&self) -> Vec<RemoteHost> {
        self.inner
            .origins
            .load()
            .values()
            .filter(|monitored| monitored.state() == OriginState::Active)
            .map(|monitored| monitored.remote_host())
            .collect()
    }
}

impl Drop for OriginsInventory {
    fn drop(&mut self) {
        // The monitor's listener holds a sender, so the worker only stops on Close.
        self.close();
        if let Some(subscription) = self.inner.bus_subscription.lock().take() {
            subscription.abort();
        }
    }
}

pub struct OriginsInventoryBuilder {
    app_id: AppId,
    factory: Arc<dyn HostClientFactory>,
    metrics: Arc<ProxyMetrics>,
    monitor: Arc<dyn OriginHealthStatusMonitor>,
    bus: Option<EventBus>,
    options: InventoryOptions,
}

impl OriginsInventoryBuilder {
    pub fn health_monitor(mut self, monitor: Arc<dyn OriginHealthStatusMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn options(mut self, options: InventoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> OriginsInventory {
        let (events, receiver) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            app_id: self.app_id,
            origins: ArcSwap::from_pointee(OriginMap::new()),
            listeners: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            monitor: self.monitor,
            factory: self.factory,
            metrics: self.metrics,
            bus: self.bus,
            bus_subscription: Mutex::new(None),
            initial_state: self.options.initial_state,
        });

        if !inner.monitor.is_noop() {
            let listener = Arc::new(InventoryHealthListener {
                events: events.clone(),
            });
            inner.monitor.add_listener(Arc::new(AnomalyExcludingListener::new(
                listener,
                self.options.healthy_threshold,
                self.options.unhealthy_threshold,
            )));
        }

        if let Some(bus) = &inner.bus {
            let mut commands = bus.subscribe_commands();
            let forward = events.clone();
            let app_id = inner.app_id.clone();
            let subscription = tokio::spawn(async move {
                loop {
                    match commands.recv().await {
                        Ok(command) if command.is_for(&app_id) => {
                            if forward.send(InventoryEvent::Command(command)).is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(app = %app_id, missed, "origins inventory lagged behind command bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            *inner.bus_subscription.lock() = Some(subscription);
        }

        tokio::spawn(run(Arc::clone(&inner), receiver));
        tracing::debug!(app = %inner.app_id, "origins inventory started");

        OriginsInventory { inner, events }
    }
}
