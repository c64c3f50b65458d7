//! Fan-out of check events to observers.

use crate::types::{HealthCheckEvent, Status};
use common::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Consumer of health check events
pub trait Observer: Send + Sync {
    /// Handle one event. Called on the task that completed the check.
    fn notify(&self, event: &HealthCheckEvent) -> Result<()>;

    /// Name used when reporting observer failures
    fn name(&self) -> &str;
}

/// Ordered set of observers
#[derive(Default)]
pub struct Subject {
    observers: Vec<Arc<dyn Observer>>,
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; observers are notified in registration order.
    pub fn attach(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer.
    ///
    /// A failing or panicking observer is logged and skipped; the remaining
    /// observers still run and nothing is returned to the caller.
    pub fn publish(&self, event: &HealthCheckEvent) {
        for observer in &self.observers {
            match catch_unwind(AssertUnwindSafe(|| observer.notify(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        observer = observer.name(),
                        service = %event.service_name,
                        error = %e,
                        "Observer failed to handle event"
                    );
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        observer = observer.name(),
                        service = %event.service_name,
                        panic = %message,
                        "Observer panicked while handling event"
                    );
                }
            }
        }
    }
}

/// Writes every event to the process log
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Observer for LoggingObserver {
    fn notify(&self, event: &HealthCheckEvent) -> Result<()> {
        let error = event.error.as_deref().unwrap_or("");
        match event.status {
            Status::Operational => info!(
                service = %event.service_name,
                status = %event.status,
                latency_ms = event.latency_ms,
                status_code = event.status_code,
                "Health check result"
            ),
            Status::Degraded | Status::Down | Status::Maintenance => warn!(
                service = %event.service_name,
                status = %event.status,
                latency_ms = event.latency_ms,
                status_code = event.status_code,
                error,
                "Health check result"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
