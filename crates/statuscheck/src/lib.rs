//! Status monitoring engine.
//!
//! This crate periodically probes registered services and records the
//! outcome of every check:
//! - HTTP checks with expected response codes
//! - TCP connect checks
//! - DNS resolution checks
//! - Pushed updates from webhook services, signed with HMAC-SHA256
//!
//! # Features
//!
//! - Bounded worker pool per cycle, with per-check and per-cycle deadlines
//! - Overlapping cycles are skipped, never queued
//! - Manual status overrides resolved at read time
//! - Observer fan-out for logging, metrics and alerting
//!
//! # Example
//!
//! ```no_run
//! use statuscheck::{
//!     Checkers, LoggingObserver, Repository, Scheduler, SchedulerConfig, Subject,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(repository: Arc<dyn Repository>) -> common::Result<()> {
//! let mut subject = Subject::new();
//! subject.attach(Arc::new(LoggingObserver::new()));
//!
//! let scheduler = Scheduler::new(
//!     repository,
//!     Arc::new(subject),
//!     Checkers::with_defaults()?,
//!     SchedulerConfig::default(),
//!     None,
//! );
//!
//! let shutdown = CancellationToken::new();
//! scheduler.start(&shutdown)?;
//!
//! // Run a cycle on demand
//! let report = scheduler.run_health_checks(&shutdown).await;
//!
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod alerting;
pub mod checkers;
pub mod evaluator;
pub mod metrics;
pub mod observer;
pub mod repository;
pub mod scheduler;
pub mod types;
pub mod webhook;

pub use alerting::AlertingObserver;
pub use checkers::{Checkers, DnsChecker, HealthChecker, HttpChecker, TcpChecker};
pub use metrics::{MetricsObserver, MetricsRegistry};
pub use observer::{LoggingObserver, Observer, Subject};
pub use repository::Repository;
pub use scheduler::{CycleReport, EffectiveServiceStatus, Scheduler, SchedulerConfig, SchedulerState};
pub use types::{
    CheckResult, HealthCheckEvent, ManualStatusOverride, Service, ServiceStatus, ServiceType,
    Status, StatusLog, WebhookPayload,
};
