//! Runtime types for the status server.

use serde::{Deserialize, Serialize};
use statuscheck::{HealthCheckEvent, SchedulerConfig, Service};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Check cycle timing and concurrency
    pub scheduler: SchedulerConfig,

    /// Operational checks slower than this raise an alert
    pub alert_threshold: Duration,

    /// Alert channel buffer size
    pub alert_capacity: usize,

    /// Longest time an alert waits for its batch to fill
    pub batch_delay: Duration,

    /// Maximum alerts per delivery
    pub batch_size: usize,

    /// Endpoint receiving alert batches, alerts are logged when unset
    pub sink_url: Option<String>,

    /// Timeout for one alert delivery
    pub sink_timeout: Duration,

    /// Serve Prometheus metrics
    pub metrics_enabled: bool,

    /// Metrics endpoint address
    pub metrics_listen_addr: String,

    /// Services registered at startup
    pub services: Vec<Service>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            alert_threshold: Duration::from_secs(2),
            alert_capacity: statuscheck::alerting::DEFAULT_ALERT_CAPACITY,
            batch_delay: Duration::from_millis(500),
            batch_size: 50,
            sink_url: None,
            sink_timeout: Duration::from_secs(5),
            metrics_enabled: true,
            metrics_listen_addr: "127.0.0.1:9464".to_string(),
            services: Vec::new(),
        }
    }
}

/// Alerts delivered together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertBatch {
    pub alerts: Vec<HealthCheckEvent>,
}

impl AlertBatch {
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
