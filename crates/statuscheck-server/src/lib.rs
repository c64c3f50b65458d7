//! Statuscheck Server
//!
//! Hosts the status monitoring engine as a long-running process.
//!
//! # Components
//!
//! - **Store**: in-memory repository of services and their check history
//! - **Scheduler**: periodic check cycles, from the `statuscheck` crate
//! - **Notifier**: batches alerts and delivers them to a sink
//! - **Metrics server**: Prometheus endpoint over HTTP
//!
//! Configuration is read from YAML, see [`config::Config`].

pub mod config;
pub mod http_server;
pub mod notifier;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::{Config, ConfigError};
pub use http_server::MetricsServer;
pub use notifier::{AlertNotifier, AlertSink, LogSink, WebhookSink};
pub use server::StatusServer;
pub use store::MemoryRepository;
pub use telemetry::{TelemetryGuard, init_tracing};
pub use types::{AlertBatch, ServerConfig};
