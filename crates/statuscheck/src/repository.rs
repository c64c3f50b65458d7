//! Storage interface consumed by the engine.
//!
//! Implementations own their synchronization; the engine calls them
//! concurrently from every worker.

use crate::types::{Service, ServiceStatus, StatusLog};
use async_trait::async_trait;
use common::Result;

/// Persistent store of services and their check history
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Services with `enabled` set
    async fn get_enabled(&self) -> Result<Vec<Service>>;

    /// Append one check outcome
    async fn save_status_log(&self, log: &StatusLog) -> Result<()>;

    /// Every service with its most recent log
    async fn get_latest_status(&self) -> Result<Vec<ServiceStatus>>;

    /// Most recent logs of a service, newest first
    async fn get_status_history(&self, name: &str, limit: usize) -> Result<Vec<StatusLog>>;

    /// Look a service up by slug
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Service>>;
}
