//! Probe strategies for HTTP, TCP and DNS services.
//!
//! Webhook services have no strategy: their status is pushed, see
//! [`crate::webhook`].

use crate::types::{CheckResult, Service, ServiceType};
use async_trait::async_trait;
use common::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe `service`, spending at most `budget`
    async fn check(&self, service: &Service, budget: Duration) -> CheckResult;

    /// Get the name of this checker
    fn name(&self) -> &str;
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Classify an HTTP response code against the expected one.
///
/// Exact match is operational. A same-class mismatch, or a redirect where a
/// success was expected, is degraded. Anything else is down.
pub fn classify_response(status_code: u16, expected: u16, latency_ms: i64) -> CheckResult {
    let class = status_code / 100;
    let expected_class = expected / 100;

    let result = if status_code == expected {
        CheckResult::operational(latency_ms)
    } else if class == expected_class || (expected_class == 2 && class == 3) {
        CheckResult::degraded(
            latency_ms,
            format!("unexpected status code {} (expected {})", status_code, expected),
        )
    } else {
        CheckResult::down(
            latency_ms,
            format!("unexpected status code {} (expected {})", status_code, expected),
        )
    };
    result.with_status_code(status_code)
}

/// HTTP health checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    /// Create a new HTTP health checker
    ///
    /// Redirects are not followed so the response code can be compared
    /// against the configured expectation.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("statuscheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn method(service: &Service) -> Result<reqwest::Method> {
        match service.method.as_deref() {
            None | Some("") => Ok(reqwest::Method::GET),
            Some(method) => reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::validation(format!("invalid HTTP method: {}", method))),
        }
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self, service: &Service, budget: Duration) -> CheckResult {
        let method = match Self::method(service) {
            Ok(method) => method,
            Err(e) => return CheckResult::unreachable(e.to_string()),
        };

        let mut request = self
            .client
            .request(method, &service.url)
            .timeout(budget);
        for (name, value) in &service.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let start = Instant::now();

        // send() resolves once the response head has arrived
        match timeout(budget, request.send()).await {
            Ok(Ok(response)) => {
                let latency_ms = elapsed_ms(start);
                let status_code = response.status().as_u16();
                let result = classify_response(status_code, service.expected_status(), latency_ms);
                debug!(
                    service = %service.name,
                    url = %service.url,
                    status_code,
                    latency_ms,
                    status = %result.status,
                    "HTTP check completed"
                );
                result
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!(service = %service.name, url = %service.url, "HTTP check timed out");
                CheckResult::timeout()
            }
            Ok(Err(e)) => {
                warn!(service = %service.name, url = %service.url, error = %e, "HTTP check failed");
                CheckResult::unreachable(format!("HTTP request failed: {}", e))
            }
            Err(_) => {
                warn!(service = %service.name, url = %service.url, "HTTP check timed out");
                CheckResult::timeout()
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Extract `host` and `port` from `tcp://host:port`, `scheme://host[:port]` or `host:port`.
pub fn tcp_target(target: &str) -> Result<(String, u16)> {
    let target = target.trim();

    if target.contains("://") {
        let url = Url::parse(target)
            .map_err(|e| Error::validation(format!("invalid url {:?}: {}", target, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::validation(format!("no host in {:?}", target)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::validation(format!("no port in {:?}", target)))?;
        return Ok((host.trim_matches(['[', ']']).to_string(), port));
    }

    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| Error::validation(format!("expected host:port, got {:?}", target)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::validation(format!("invalid port in {:?}", target)))?;
    let host = host.trim_matches(['[', ']']);
    if host.is_empty() {
        return Err(Error::validation(format!("no host in {:?}", target)));
    }
    Ok((host.to_string(), port))
}

/// TCP health checker
#[derive(Debug, Default)]
pub struct TcpChecker;

impl TcpChecker {
    /// Create a new TCP health checker
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HealthChecker for TcpChecker {
    async fn check(&self, service: &Service, budget: Duration) -> CheckResult {
        let (host, port) = match tcp_target(&service.url) {
            Ok(target) => target,
            Err(e) => return CheckResult::unreachable(e.to_string()),
        };

        let start = Instant::now();

        match timeout(budget, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_stream)) => {
                let latency_ms = elapsed_ms(start);
                debug!(service = %service.name, host = %host, port, latency_ms, "TCP check successful");
                CheckResult::operational(latency_ms)
            }
            Ok(Err(e)) => {
                warn!(service = %service.name, host = %host, port, error = %e, "TCP check failed");
                CheckResult::unreachable(format!("Connection failed: {}", e))
            }
            Err(_) => {
                warn!(service = %service.name, host = %host, port, "TCP check timed out");
                CheckResult::timeout()
            }
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

/// Host to resolve for a DNS service: the URL's host, or the target itself.
pub fn dns_host(target: &str) -> Result<String> {
    let target = target.trim();

    let host = if target.contains("://") {
        let url = Url::parse(target)
            .map_err(|e| Error::validation(format!("invalid url {:?}: {}", target, e)))?;
        url.host_str().unwrap_or_default().to_string()
    } else {
        match target.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host.to_string(),
            _ => target.to_string(),
        }
    };

    let host = host.trim_matches(['[', ']']).to_string();
    if host.is_empty() {
        return Err(Error::validation(format!("no host in {:?}", target)));
    }
    Ok(host)
}

/// DNS health checker
#[derive(Debug, Default)]
pub struct DnsChecker;

impl DnsChecker {
    /// Create a new DNS health checker
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HealthChecker for DnsChecker {
    async fn check(&self, service: &Service, budget: Duration) -> CheckResult {
        let host = match dns_host(&service.url) {
            Ok(host) => host,
            Err(e) => return CheckResult::unreachable(e.to_string()),
        };

        let start = Instant::now();

        // Use system DNS resolver
        match timeout(budget, tokio::net::lookup_host((host.as_str(), 0))).await {
            Ok(Ok(addrs)) => {
                let latency_ms = elapsed_ms(start);
                let count = addrs.count();
                if count > 0 {
                    debug!(service = %service.name, host = %host, count, latency_ms, "DNS check successful");
                    CheckResult::operational(latency_ms)
                } else {
                    warn!(service = %service.name, host = %host, "DNS check failed: no addresses resolved");
                    CheckResult::down(latency_ms, "no addresses resolved")
                }
            }
            Ok(Err(e)) => {
                warn!(service = %service.name, host = %host, error = %e, "DNS check failed");
                CheckResult::unreachable(format!("DNS lookup failed: {}", e))
            }
            Err(_) => {
                warn!(service = %service.name, host = %host, "DNS check timed out");
                CheckResult::timeout()
            }
        }
    }

    fn name(&self) -> &str {
        "dns"
    }
}

/// The strategy used for each probed service type
#[derive(Clone)]
pub struct Checkers {
    http: Arc<dyn HealthChecker>,
    tcp: Arc<dyn HealthChecker>,
    dns: Arc<dyn HealthChecker>,
}

impl Checkers {
    pub fn new(
        http: Arc<dyn HealthChecker>,
        tcp: Arc<dyn HealthChecker>,
        dns: Arc<dyn HealthChecker>,
    ) -> Self {
        Self { http, tcp, dns }
    }

    /// The network-backed strategies.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            Arc::new(HttpChecker::new()?),
            Arc::new(TcpChecker::new()),
            Arc::new(DnsChecker::new()),
        ))
    }

    /// Strategy for a service type; webhook services are never probed.
    pub fn for_type(&self, service_type: ServiceType) -> Option<&Arc<dyn HealthChecker>> {
        match service_type {
            ServiceType::Http => Some(&self.http),
            ServiceType::Tcp => Some(&self.tcp),
            ServiceType::Dns => Some(&self.dns),
            ServiceType::Webhook => None,
        }
    }
}
