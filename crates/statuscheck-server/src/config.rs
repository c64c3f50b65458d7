//! Configuration loading and validation for the status server

use crate::types::ServerConfig;
use common::LogFormat;
use serde::{Deserialize, Serialize};
use statuscheck::{SchedulerConfig, Service};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid service definition: {0}")]
    ServiceError(#[from] common::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub alerting: AlertingSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Services registered at startup
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.scheduler.validate()?;
        self.alerting.validate()?;
        self.metrics.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}

/// Check cycle settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_scheduler_timeouts"))]
#[serde(default)]
pub struct SchedulerSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub check_timeout: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub cycle_timeout: Duration,

    #[validate(range(min = 1, max = 1000))]
    pub workers: usize,
}

/// Alert detection and delivery settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AlertingSettings {
    /// Operational checks slower than this raise an alert
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub latency_threshold: Duration,

    #[validate(range(min = 1, max = 100000))]
    pub channel_capacity: usize,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_batch_delay")]
    pub batch_delay: Duration,

    #[validate(range(min = 1, max = 10000))]
    pub batch_size: usize,

    /// Alert batches are POSTed here as JSON; logged when unset
    #[validate(url)]
    pub sink_url: Option<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub sink_timeout: Duration,
}

/// Prometheus endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(length(min = 1), custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// OpenTelemetry export settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub service_name: String,

    #[validate(url)]
    pub otlp_endpoint: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: LogFormat,
}

// Default implementations

impl Default for SchedulerSettings {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            interval: defaults.interval,
            check_timeout: defaults.check_timeout,
            cycle_timeout: defaults.cycle_timeout,
            workers: defaults.workers,
        }
    }
}

impl Default for AlertingSettings {
    fn default() -> Self {
        Self {
            latency_threshold: Duration::from_secs(2),
            channel_capacity: statuscheck::alerting::DEFAULT_ALERT_CAPACITY,
            batch_delay: Duration::from_millis(500),
            batch_size: 50,
            sink_url: None,
            sink_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "statuscheck-server".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

// Custom validators

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    let secs = interval.as_secs_f64();
    if !(1.0..=86_400.0).contains(&secs) {
        return Err(ValidationError::new("interval_out_of_range"));
    }
    Ok(())
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(1..=3_600_000).contains(&millis) {
        return Err(ValidationError::new("timeout_out_of_range"));
    }
    Ok(())
}

fn validate_batch_delay(delay: &Duration) -> Result<(), ValidationError> {
    let millis = delay.as_millis();
    if !(1..=60_000).contains(&millis) {
        return Err(ValidationError::new("batch_delay_out_of_range"));
    }
    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.trim()
        .parse::<std::net::SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_scheduler_timeouts(settings: &SchedulerSettings) -> Result<(), ValidationError> {
    if settings.check_timeout > settings.cycle_timeout {
        return Err(ValidationError::new("check_timeout_exceeds_cycle_timeout"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        for service in &mut config.services {
            statuscheck::evaluator::validate(service)?;
        }
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/statuscheck/statuscheck-server.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./statuscheck-server.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/statuscheck/statuscheck-server.yaml"))
    }

    /// Convert to the runtime configuration
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            scheduler: SchedulerConfig {
                interval: self.scheduler.interval,
                check_timeout: self.scheduler.check_timeout,
                cycle_timeout: self.scheduler.cycle_timeout,
                workers: self.scheduler.workers,
            },
            alert_threshold: self.alerting.latency_threshold,
            alert_capacity: self.alerting.channel_capacity,
            batch_delay: self.alerting.batch_delay,
            batch_size: self.alerting.batch_size,
            sink_url: self.alerting.sink_url.clone(),
            sink_timeout: self.alerting.sink_timeout,
            metrics_enabled: self.metrics.enabled,
            metrics_listen_addr: self.metrics.listen_addr.clone(),
            services: self.services.clone(),
        }
    }
}
