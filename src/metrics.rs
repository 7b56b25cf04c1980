//! Prometheus metrics for origin health and dispatch outcomes.

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::origin::Origin;

/// Owns the registry and every metric family this crate reports.
pub struct ProxyMetrics {
    registry: Registry,
    origin_status: IntGaugeVec,
    error_responses: IntCounterVec,
    requests_cancelled: IntCounterVec,
}

impl ProxyMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let origin_status = IntGaugeVec::new(
            Opts::new(
                "origin_status",
                "Origin state: 1 active, 0 inactive, -1 disabled",
            ),
            &["app", "origin"],
        )?;
        let error_responses = IntCounterVec::new(
            Opts::new(
                "origin_error_responses_total",
                "Responses from origins with a status of 400 or above",
            ),
            &["status"],
        )?;
        let requests_cancelled = IntCounterVec::new(
            Opts::new(
                "origin_requests_cancelled_total",
                "Requests abandoned by the caller while in flight to an origin",
            ),
            &["app", "origin"],
        )?;

        registry.register(Box::new(origin_status.clone()))?;
        registry.register(Box::new(error_responses.clone()))?;
        registry.register(Box::new(requests_cancelled.clone()))?;

        Ok(Self {
            registry,
            origin_status,
            error_responses,
            requests_cancelled,
        })
    }

    /// Registers the status gauge for an origin.
    pub fn origin_status_gauge(&self, origin: &Origin) -> OriginStatusGauge {
        OriginStatusGauge {
            vec: self.origin_status.clone(),
            app: origin.app_id().to_string(),
            origin: origin.id().to_string(),
        }
    }

    /// Current gauge value for an origin, or `None` once it has been deregistered.
    pub fn origin_status(&self, app: &str, origin: &str) -> Option<i64> {
        self.origin_status
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let labels = metric.get_label();
                labels
                    .iter()
                    .any(|l| l.get_name() == "app" && l.get_value() == app)
                    && labels
                        .iter()
                        .any(|l| l.get_name() == "origin" && l.get_value() == origin)
            })
            .map(|metric| metric.get_gauge().get_value() as i64)
    }

    pub fn record_error_response(&self, status: u16) {
        self.error_responses
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    pub fn error_responses(&self, status: u16) -> u64 {
        self.error_responses
            .with_label_values(&[&status.to_string()])
            .get()
    }

    pub fn record_request_cancelled(&self, origin: &Origin) {
        self.requests_cancelled
            .with_label_values(&[origin.app_id().as_str(), origin.id().as_str()])
            .inc();
    }

    pub fn requests_cancelled(&self, origin: &Origin) -> u64 {
        self.requests_cancelled
            .with_label_values(&[origin.app_id().as_str(), origin.id().as_str()])
            .get()
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Handle on one origin's status series. Dropping it leaves the series in
/// place; call [`OriginStatusGauge::delete`] to deregister.
pub struct OriginStatusGauge {
    vec: IntGaugeVec,
    app: String,
    origin: String,
}

impl OriginStatusGauge {
    pub fn set(&self, value: i64) {
        self.vec
            .with_label_values(&[self.app.as_str(), self.origin.as_str()])
            .set(value);
    }

    pub fn delete(&self) {
        // Absent series is fine: the origin may never have reported a value.
        let _ = self
            .vec
            .remove_label_values(&[self.app.as_str(), self.origin.as_str()]);
    }
}
