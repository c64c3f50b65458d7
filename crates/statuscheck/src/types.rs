//! Service model, status values and check records.

use chrono::{DateTime, Utc};
use common::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Latency recorded when no connection was established (refused, timeout, cancelled).
pub const FAILED_LATENCY_MS: i64 = -1;

/// Error text recorded for checks that exceeded their deadline.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Canonical service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Service responds as expected
    Operational,
    /// Service responds, but not exactly as expected
    Degraded,
    /// Service is unreachable or failing
    Down,
    /// Service is under planned maintenance
    Maintenance,
}

impl Status {
    /// All status values, in severity order.
    pub const ALL: [Status; 4] = [
        Status::Operational,
        Status::Degraded,
        Status::Down,
        Status::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Operational => "operational",
            Status::Degraded => "degraded",
            Status::Down => "down",
            Status::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::validation(format!("invalid status: {:?}", s)))
    }
}

/// Probe type of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// HTTP/HTTPS request
    #[default]
    Http,
    /// TCP connect
    Tcp,
    /// DNS resolution
    Dns,
    /// Status pushed by the service itself
    Webhook,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        ServiceType::Http,
        ServiceType::Tcp,
        ServiceType::Dns,
        ServiceType::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Http => "http",
            ServiceType::Tcp => "tcp",
            ServiceType::Dns => "dns",
            ServiceType::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|service_type| service_type.as_str() == s)
            .ok_or_else(|| Error::validation(format!("invalid service type: {:?}", s)))
    }
}

/// Operator-set status that takes precedence over probe results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualStatusOverride {
    pub status: Status,
    pub reason: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
    /// Unset means the override never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ManualStatusOverride {
    /// An override is active until (and excluding) its expiry instant.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => now < expires_at,
        }
    }
}

/// A monitored target
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Unique display name
    pub name: String,

    /// Unique URL-safe key, derived from the name when empty
    #[serde(default)]
    pub slug: String,

    /// Probe type, `http` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,

    /// Probe target, may be empty for webhook services
    #[serde(default)]
    pub url: String,

    /// HTTP method, GET when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Extra request headers for HTTP probes
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Expected HTTP response code, 0 or unset means the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Shared secret for pushed status signatures, never serialized
    #[serde(default, skip_serializing)]
    pub webhook_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<ManualStatusOverride>,
}

fn default_enabled() -> bool {
    true
}

impl Service {
    /// Create an enabled service with the given probe type and target.
    pub fn new(name: impl Into<String>, service_type: ServiceType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: Some(service_type),
            url: url.into(),
            enabled: true,
            ..Default::default()
        }
    }

    /// Probe type with the default applied.
    pub fn service_type(&self) -> ServiceType {
        self.service_type.unwrap_or_default()
    }

    /// Expected HTTP response code with the default applied.
    pub fn expected_status(&self) -> u16 {
        match self.expected_status {
            Some(code) if code != 0 => code,
            _ => crate::evaluator::DEFAULT_EXPECTED_STATUS,
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("slug", &self.slug)
            .field("service_type", &self.service_type)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("expected_status", &self.expected_status)
            .field("enabled", &self.enabled)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("manual_override", &self.manual_override)
            .finish()
    }
}

/// Raw outcome of a single probe
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub status: Status,

    /// Elapsed time in milliseconds, [`FAILED_LATENCY_MS`] when no connection was made
    pub latency_ms: i64,

    /// Response code (HTTP checks), 0 otherwise
    pub status_code: u16,

    pub error: Option<String>,
}

impl CheckResult {
    /// Create an operational result
    pub fn operational(latency_ms: i64) -> Self {
        Self {
            status: Status::Operational,
            latency_ms,
            status_code: 0,
            error: None,
        }
    }

    /// Create a degraded result
    pub fn degraded(latency_ms: i64, message: impl Into<String>) -> Self {
        Self {
            status: Status::Degraded,
            latency_ms,
            status_code: 0,
            error: Some(message.into()),
        }
    }

    /// Create a down result for a probe that got an answer
    pub fn down(latency_ms: i64, message: impl Into<String>) -> Self {
        Self {
            status: Status::Down,
            latency_ms,
            status_code: 0,
            error: Some(message.into()),
        }
    }

    /// Create a down result for a probe that never connected
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::down(FAILED_LATENCY_MS, message)
    }

    /// Create a timeout result
    pub fn timeout() -> Self {
        Self::unreachable(TIMEOUT_ERROR)
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

/// Immutable record of one check outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLog {
    pub service_name: String,
    pub status: Status,
    pub latency_ms: i64,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusLog {
    /// Record a probe result for a service.
    pub fn from_check(service_name: &str, result: &CheckResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: result.status,
            latency_ms: result.latency_ms,
            status_code: result.status_code,
            error: result.error.clone(),
            timestamp,
        }
    }
}

/// In-memory notification of one completed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckEvent {
    pub service_name: String,
    /// Effective status (manual override applied)
    pub status: Status,
    pub latency_ms: i64,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckEvent {
    /// Build the event for a persisted log, reporting `status` instead of the observed one.
    pub fn from_log(log: &StatusLog, status: Status) -> Self {
        Self {
            service_name: log.service_name.clone(),
            status,
            latency_ms: log.latency_ms,
            status_code: log.status_code,
            error: log.error.clone(),
            timestamp: log.timestamp,
        }
    }
}

/// A service together with its most recent check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: Service,
    pub latest: Option<StatusLog>,
}

/// Status update pushed by a webhook-type service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
