//! In-memory repository backing the server.
//!
//! Lock order is always slug index before services, so registration can
//! reserve both keys without racing another registration.

use async_trait::async_trait;
use common::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use statuscheck::{ManualStatusOverride, Repository, Service, ServiceStatus, StatusLog, evaluator};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Logs kept per service by default
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Services and their check history, held in concurrent maps
pub struct MemoryRepository {
    /// Services by name
    services: DashMap<String, Service>,
    /// Service name by slug
    slugs: DashMap<String, String>,
    /// History by service name, newest first
    history: DashMap<String, VecDeque<StatusLog>>,
    history_capacity: usize,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl MemoryRepository {
    /// Create an empty repository keeping at most `history_capacity` logs per service
    pub fn new(history_capacity: usize) -> Self {
        Self {
            services: DashMap::new(),
            slugs: DashMap::new(),
            history: DashMap::new(),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Validate and register a service.
    ///
    /// Fails with a conflict when the name or slug is already taken.
    pub fn register(&self, mut service: Service) -> Result<Service> {
        evaluator::validate(&mut service)?;

        match self.slugs.entry(service.slug.clone()) {
            Entry::Occupied(_) => Err(Error::conflict(format!(
                "slug {:?} is already registered",
                service.slug
            ))),
            Entry::Vacant(slug_entry) => match self.services.entry(service.name.clone()) {
                Entry::Occupied(_) => Err(Error::conflict(format!(
                    "service {:?} is already registered",
                    service.name
                ))),
                Entry::Vacant(service_entry) => {
                    slug_entry.insert(service.name.clone());
                    service_entry.insert(service.clone());
                    info!(
                        service = %service.name,
                        slug = %service.slug,
                        service_type = %service.service_type(),
                        "Registered service"
                    );
                    Ok(service)
                }
            },
        }
    }

    /// All registered services, ordered by name
    pub fn services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.iter().map(|s| s.value().clone()).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Put the service under a manual status override
    pub fn set_override(&self, slug: &str, manual_override: ManualStatusOverride) -> Result<()> {
        let name = self.name_for_slug(slug)?;
        let mut service = self
            .services
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("service {:?}", name)))?;

        info!(
            service = %name,
            status = %manual_override.status,
            set_by = %manual_override.set_by,
            expires_at = ?manual_override.expires_at,
            "Manual status override set"
        );
        service.manual_override = Some(manual_override);
        Ok(())
    }

    /// Remove any manual override; clearing an absent override is not an error
    pub fn clear_override(&self, slug: &str) -> Result<()> {
        let name = self.name_for_slug(slug)?;
        let mut service = self
            .services
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("service {:?}", name)))?;

        if service.manual_override.take().is_some() {
            info!(service = %name, "Manual status override cleared");
        }
        Ok(())
    }

    fn name_for_slug(&self, slug: &str) -> Result<String> {
        self.slugs
            .get(slug)
            .map(|name| name.value().clone())
            .ok_or_else(|| Error::not_found(format!("service with slug {:?}", slug)))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_enabled(&self) -> Result<Vec<Service>> {
        Ok(self.services().into_iter().filter(|s| s.enabled).collect())
    }

    async fn save_status_log(&self, log: &StatusLog) -> Result<()> {
        if !self.services.contains_key(&log.service_name) {
            return Err(Error::not_found(format!("service {:?}", log.service_name)));
        }

        let mut history = self.history.entry(log.service_name.clone()).or_default();
        history.push_front(log.clone());
        history.truncate(self.history_capacity);

        debug!(service = %log.service_name, status = %log.status, "Saved status log");
        Ok(())
    }

    async fn get_latest_status(&self) -> Result<Vec<ServiceStatus>> {
        Ok(self
            .services()
            .into_iter()
            .map(|service| {
                let latest = self
                    .history
                    .get(&service.name)
                    .and_then(|history| history.front().cloned());
                ServiceStatus { service, latest }
            })
            .collect())
    }

    async fn get_status_history(&self, name: &str, limit: usize) -> Result<Vec<StatusLog>> {
        if !self.services.contains_key(name) {
            return Err(Error::not_found(format!("service {:?}", name)));
        }

        Ok(self
            .history
            .get(name)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Service>> {
        let Some(name) = self.slugs.get(slug).map(|name| name.value().clone()) else {
            return Ok(None);
        };
        Ok(self.services.get(&name).map(|s| s.value().clone()))
    }
}
