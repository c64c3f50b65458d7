//! Prometheus metrics for the check engine.
//!
//! Everything here is in-memory aggregation; exposing the registry over HTTP
//! is left to the host process.

use crate::observer::Observer;
use crate::types::{HealthCheckEvent, Status};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for per-service metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    /// Service name
    pub service: String,
}

/// Labels for check result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    /// Service name
    pub service: String,
    /// Effective status (operational, degraded, down, maintenance)
    pub status: String,
}

/// Labels for cycle metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    /// Outcome (completed, failed)
    pub outcome: String,
}

/// Labels for repository error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Repository operation (get_enabled, save_status_log, ...)
    pub operation: String,
}

/// Labels for webhook metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WebhookLabels {
    /// Result (accepted, rejected)
    pub result: String,
}

/// Metrics registry with all engine metrics
pub struct MetricsRegistry {
    registry: Registry,

    // Per-service metrics
    /// Checks performed by service and status
    checks_total: Family<CheckLabels, Counter>,
    /// Check latency
    latency_seconds: Family<ServiceLabels, Histogram>,
    /// Current status (0=operational, 1=degraded, 2=down, 3=maintenance)
    status: Family<ServiceLabels, Gauge>,

    // Scheduler metrics
    /// Cycles run by outcome
    cycles_total: Family<CycleLabels, Counter>,
    /// Ticks skipped because a cycle was still running
    ticks_skipped_total: Counter,
    /// Cycle duration
    cycle_duration_seconds: Histogram,
    /// Repository errors by operation
    repository_errors_total: Family<OperationLabels, Counter>,

    // Alerting and ingestion
    /// Alerts queued for delivery
    alerts_queued_total: Counter,
    /// Alerts dropped because the channel was full
    alerts_dropped_total: Counter,
    /// Alert batches that failed delivery
    alert_delivery_failures_total: Counter,
    /// Webhook events by result
    webhooks_total: Family<WebhookLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("statuscheck");

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register(
            "checks",
            "Health checks performed by service and status",
            checks_total.clone(),
        );

        // Exponential buckets from 5ms to ~40s
        let latency_seconds = Family::<ServiceLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.005, 2.0, 14))
        });
        registry.register(
            "check_latency_seconds",
            "Health check latency in seconds",
            latency_seconds.clone(),
        );

        let status = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            "service_status",
            "Current status (0=operational, 1=degraded, 2=down, 3=maintenance)",
            status.clone(),
        );

        let cycles_total = Family::<CycleLabels, Counter>::default();
        registry.register("cycles", "Check cycles run by outcome", cycles_total.clone());

        let ticks_skipped_total = Counter::default();
        registry.register(
            "ticks_skipped",
            "Scheduler ticks skipped because a cycle was still running",
            ticks_skipped_total.clone(),
        );

        let cycle_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 14));
        registry.register(
            "cycle_duration_seconds",
            "Check cycle duration in seconds",
            cycle_duration_seconds.clone(),
        );

        let repository_errors_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "repository_errors",
            "Repository errors by operation",
            repository_errors_total.clone(),
        );

        let alerts_queued_total = Counter::default();
        registry.register(
            "alerts_queued",
            "Alerts queued for delivery",
            alerts_queued_total.clone(),
        );

        let alerts_dropped_total = Counter::default();
        registry.register(
            "alerts_dropped",
            "Alerts dropped because the alert channel was full",
            alerts_dropped_total.clone(),
        );

        let alert_delivery_failures_total = Counter::default();
        registry.register(
            "alert_delivery_failures",
            "Alert batches that failed delivery",
            alert_delivery_failures_total.clone(),
        );

        let webhooks_total = Family::<WebhookLabels, Counter>::default();
        registry.register(
            "webhooks",
            "Pushed webhook events by result",
            webhooks_total.clone(),
        );

        Self {
            registry,
            checks_total,
            latency_seconds,
            status,
            cycles_total,
            ticks_skipped_total,
            cycle_duration_seconds,
            repository_errors_total,
            alerts_queued_total,
            alerts_dropped_total,
            alert_delivery_failures_total,
            webhooks_total,
        }
    }

    /// Record a completed check
    pub fn record_event(&self, event: &HealthCheckEvent) {
        self.checks_total
            .get_or_create(&CheckLabels {
                service: event.service_name.clone(),
                status: event.status.to_string(),
            })
            .inc();

        let labels = ServiceLabels {
            service: event.service_name.clone(),
        };

        // Negative latency marks a probe that never connected
        if event.latency_ms >= 0 {
            self.latency_seconds
                .get_or_create(&labels)
                .observe(event.latency_ms as f64 / 1000.0);
        }

        self.status.get_or_create(&labels).set(status_value(event.status));
    }

    /// Record a finished cycle
    pub fn record_cycle(&self, completed: bool, duration: Duration) {
        let outcome = if completed { "completed" } else { "failed" };
        self.cycles_total
            .get_or_create(&CycleLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        self.cycle_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped_total.inc();
    }

    pub fn record_repository_error(&self, operation: &str) {
        self.repository_errors_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    pub fn record_alert_queued(&self) {
        self.alerts_queued_total.inc();
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped_total.inc();
    }

    pub fn record_alert_delivery_failure(&self) {
        self.alert_delivery_failures_total.inc();
    }

    pub fn record_webhook(&self, accepted: bool) {
        let result = if accepted { "accepted" } else { "rejected" };
        self.webhooks_total
            .get_or_create(&WebhookLabels {
                result: result.to_string(),
            })
            .inc();
    }

    /// Number of checks recorded for a service with the given status
    pub fn check_count(&self, service: &str, status: Status) -> u64 {
        self.checks_total
            .get_or_create(&CheckLabels {
                service: service.to_string(),
                status: status.to_string(),
            })
            .get()
    }

    /// Last recorded status value for a service, see [`status_value`]
    pub fn current_status(&self, service: &str) -> i64 {
        self.status
            .get_or_create(&ServiceLabels {
                service: service.to_string(),
            })
            .get()
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped_total.get()
    }

    pub fn alerts_dropped(&self) -> u64 {
        self.alerts_dropped_total.get()
    }

    pub fn repository_errors(&self, operation: &str) -> u64 {
        self.repository_errors_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .get()
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

/// Gauge value for a status
pub fn status_value(status: Status) -> i64 {
    match status {
        Status::Operational => 0,
        Status::Degraded => 1,
        Status::Down => 2,
        Status::Maintenance => 3,
    }
}

/// Feeds every event into a [`MetricsRegistry`]
pub struct MetricsObserver {
    metrics: Arc<MetricsRegistry>,
}

impl MetricsObserver {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }
}

impl Observer for MetricsObserver {
    fn notify(&self, event: &HealthCheckEvent) -> common::Result<()> {
        self.metrics.record_event(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "metrics"
    }
}
