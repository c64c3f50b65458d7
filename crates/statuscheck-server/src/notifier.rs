//! Alert notifier: batches breaching events and delivers them to a sink.

use crate::types::AlertBatch;
use async_trait::async_trait;
use common::{Error, Result};
use statuscheck::{HealthCheckEvent, MetricsRegistry, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Destination for alert batches
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one batch
    async fn deliver(&self, batch: &AlertBatch) -> Result<()>;

    /// Sink name used in logs
    fn name(&self) -> &str;
}

/// POSTs each batch as JSON to an HTTP endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink for `url`, giving each delivery at most `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("statuscheck-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, batch: &AlertBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::internal(format!("alert delivery to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::internal(format!(
                "alert sink {} answered {}",
                self.url, status
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Writes each alert to the process log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, batch: &AlertBatch) -> Result<()> {
        for alert in &batch.alerts {
            match alert.status {
                Status::Down => error!(
                    service = %alert.service_name,
                    status = %alert.status,
                    latency_ms = alert.latency_ms,
                    error = alert.error.as_deref().unwrap_or(""),
                    "ALERT"
                ),
                _ => warn!(
                    service = %alert.service_name,
                    status = %alert.status,
                    latency_ms = alert.latency_ms,
                    error = alert.error.as_deref().unwrap_or(""),
                    "ALERT"
                ),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Shortest accepted batch delay
pub const MIN_BATCH_DELAY: Duration = Duration::from_millis(1);

/// Batches alerts from the alerting observer and hands them to a sink
pub struct AlertNotifier {
    /// Alert receiver
    alert_rx: mpsc::Receiver<HealthCheckEvent>,

    sink: Arc<dyn AlertSink>,

    /// Longest time an alert waits for its batch to fill
    batch_delay: Duration,

    /// Maximum batch size
    batch_size: usize,

    metrics: Option<Arc<MetricsRegistry>>,
}

impl AlertNotifier {
    /// Create a new notifier.
    ///
    /// `batch_delay` is raised to [`MIN_BATCH_DELAY`] and `batch_size` to 1.
    pub fn new(
        alert_rx: mpsc::Receiver<HealthCheckEvent>,
        sink: Arc<dyn AlertSink>,
        batch_delay: Duration,
        batch_size: usize,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            alert_rx,
            sink,
            batch_delay: batch_delay.max(MIN_BATCH_DELAY),
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// Run until the alert channel closes or `shutdown` is cancelled.
    ///
    /// Pending alerts are delivered before returning.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(sink = self.sink.name(), "Alert notifier started");

        let mut batch = Vec::new();
        let mut batch_started: Option<Instant> = None;
        let mut batch_timer = interval(self.batch_delay);
        batch_timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    while let Ok(alert) = self.alert_rx.try_recv() {
                        batch.push(alert);
                    }
                    self.flush(&mut batch).await;
                    break;
                }

                alert = self.alert_rx.recv() => match alert {
                    Some(alert) => {
                        debug!(service = %alert.service_name, status = %alert.status, "Received alert");
                        batch.push(alert);
                        batch_started.get_or_insert_with(Instant::now);

                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                            batch_started = None;
                            batch_timer.reset();
                        }
                    }
                    None => {
                        self.flush(&mut batch).await;
                        break;
                    }
                },

                _ = batch_timer.tick() => {
                    if batch_started.is_some_and(|started| started.elapsed() >= self.batch_delay) {
                        self.flush(&mut batch).await;
                        batch_started = None;
                    }
                }
            }
        }

        info!("Alert notifier stopped");
    }

    /// Deliver everything in `batch`, at most `batch_size` alerts per delivery
    async fn flush(&self, batch: &mut Vec<HealthCheckEvent>) {
        while !batch.is_empty() {
            let take = batch.len().min(self.batch_size);
            let alerts: Vec<HealthCheckEvent> = batch.drain(..take).collect();
            self.deliver(AlertBatch { alerts }).await;
        }
    }

    async fn deliver(&self, batch: AlertBatch) {
        debug!(sink = self.sink.name(), alerts = batch.len(), "Delivering alert batch");

        if let Err(e) = self.sink.deliver(&batch).await {
            warn!(
                sink = self.sink.name(),
                alerts = batch.len(),
                error = %e,
                "Failed to deliver alert batch"
            );
            if let Some(ref m) = self.metrics {
                m.record_alert_delivery_failure();
            }
        }
    }
}
