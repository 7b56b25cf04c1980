//! Origin health checking.
//!
//! Monitors probe origins and announce raw results; the anomaly-excluding
//! listener turns those into state events for the inventory.

mod anomaly;
pub mod declarative;
mod monitor;
mod probe;

pub use anomaly::AnomalyExcludingListener;
pub use declarative::{health_check_function, HealthCheckFunction, ObjectHealth};
pub use monitor::{
    HealthStatusListener, NoOriginHealthStatusMonitor, OriginHealthStatusMonitor,
    ScheduledOriginHealthStatusMonitor,
};
pub use probe::{HealthCheck, HealthStatus, UrlHealthCheck};
