//! Alerting observer.
//!
//! Breaching events are queued on a bounded channel and delivered by a
//! separate consumer. The check pipeline never waits on that consumer: when
//! the channel is full the alert is dropped and counted.

use crate::metrics::MetricsRegistry;
use crate::observer::Observer;
use crate::types::{HealthCheckEvent, Status};
use common::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default alert channel capacity
pub const DEFAULT_ALERT_CAPACITY: usize = 100;

/// Queues events that breach the alert threshold
pub struct AlertingObserver {
    threshold_ms: i64,
    alert_tx: mpsc::Sender<HealthCheckEvent>,
    dropped: AtomicU64,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl AlertingObserver {
    /// Create the observer and the receiving end of its alert channel.
    ///
    /// `capacity` is clamped to at least 1.
    pub fn new(
        latency_threshold: Duration,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<HealthCheckEvent>) {
        let (alert_tx, alert_rx) = mpsc::channel(capacity.max(1));
        let observer = Self {
            threshold_ms: i64::try_from(latency_threshold.as_millis()).unwrap_or(i64::MAX),
            alert_tx,
            dropped: AtomicU64::new(0),
            metrics: None,
        };
        (observer, alert_rx)
    }

    /// Also report queued and dropped alerts to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether `event` should raise an alert.
    ///
    /// Any status other than operational breaches, as does latency above
    /// the threshold.
    pub fn is_breach(&self, event: &HealthCheckEvent) -> bool {
        event.status != Status::Operational || event.latency_ms > self.threshold_ms
    }

    /// Alerts dropped so far because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.record_alert_dropped();
        }
    }
}

impl Observer for AlertingObserver {
    fn notify(&self, event: &HealthCheckEvent) -> Result<()> {
        if !self.is_breach(event) {
            return Ok(());
        }

        match self.alert_tx.try_send(event.clone()) {
            Ok(()) => {
                debug!(service = %event.service_name, status = %event.status, "Alert queued");
                if let Some(ref m) = self.metrics {
                    m.record_alert_queued();
                }
            }
            Err(TrySendError::Full(_)) => {
                self.record_drop();
                warn!(
                    service = %event.service_name,
                    status = %event.status,
                    dropped = self.dropped(),
                    "Alert channel full, dropping alert"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.record_drop();
                debug!(service = %event.service_name, "Alert channel closed, dropping alert");
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "alerting"
    }
}
