//! Service validation and status evaluation.
//!
//! Manual overrides are resolved here at read time. Nothing caches an
//! effective status, so an override stops applying the instant it expires.

use crate::types::{Service, ServiceStatus, ServiceType, Status};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use sha2::{Digest, Sha256};

/// Expected response code for HTTP services that do not set one.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Validate a service definition and apply defaults.
///
/// Defaults: unset type becomes `http`, unset expected status on an HTTP
/// service becomes 200, an empty slug is derived from the name.
pub fn validate(service: &mut Service) -> Result<()> {
    let name = service.name.trim();
    if name.is_empty() {
        return Err(Error::validation("service name is required"));
    }
    service.name = name.to_string();

    let service_type = service.service_type();
    service.service_type = Some(service_type);

    if service_type != ServiceType::Webhook && service.url.trim().is_empty() {
        return Err(Error::validation(format!(
            "url is required for {} services",
            service_type
        )));
    }

    match service.expected_status {
        Some(code) if code != 0 && !(100..=599).contains(&code) => {
            return Err(Error::validation(format!(
                "expected status must be between 100 and 599, got {}",
                code
            )));
        }
        Some(0) | None if service_type == ServiceType::Http => {
            service.expected_status = Some(DEFAULT_EXPECTED_STATUS);
        }
        _ => {}
    }

    if service.slug.is_empty() {
        service.slug = slugify(&service.name);
    } else if !is_valid_slug(&service.slug) {
        return Err(Error::validation(format!(
            "slug {:?} must contain only lowercase letters, digits and '-'",
            service.slug
        )));
    }

    Ok(())
}

/// Whether the service has an override in effect at `now`.
pub fn has_manual_override(service: &Service, now: DateTime<Utc>) -> bool {
    service
        .manual_override
        .as_ref()
        .is_some_and(|o| o.is_active(now))
}

/// Status after applying an active manual override.
pub fn effective_status(service: &Service, raw: Status, now: DateTime<Utc>) -> Status {
    match &service.manual_override {
        Some(o) if o.is_active(now) => o.status,
        _ => raw,
    }
}

/// Effective status of a service's latest check, if it has one or an override applies.
pub fn effective_service_status(status: &ServiceStatus, now: DateTime<Utc>) -> Option<Status> {
    match (&status.service.manual_override, &status.latest) {
        (Some(o), _) if o.is_active(now) => Some(o.status),
        (_, Some(log)) => Some(log.status),
        _ => None,
    }
}

pub fn is_valid_status(s: &str) -> bool {
    s.parse::<Status>().is_ok()
}

pub fn is_valid_service_type(s: &str) -> bool {
    s.parse::<ServiceType>().is_ok()
}

/// Lowercase ASCII alphanumerics, every other run collapsed into a single '-'.
///
/// Names without any ASCII alphanumeric get `svc-` followed by the first
/// eight bytes of the name's SHA-256 in hex.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        let digest = Sha256::digest(name.as_bytes());
        slug = format!("svc-{}", hex::encode(&digest[..8]));
    }
    slug
}

fn is_valid_slug(slug: &str) -> bool {
    slug.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
