//! Pushed status ingestion for webhook services.
//!
//! A pushed body is signed with HMAC-SHA256 over the raw bytes using the
//! service's secret. The signature is hex encoded, optionally prefixed with
//! `sha256=`.

use crate::types::{Service, ServiceType, Status, StatusLog, WebhookPayload};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex HMAC-SHA256 of `body` under `secret`, without prefix.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `signature` against the body in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<()> {
    let signature = signature.trim();
    let hex_digest = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let expected = hex::decode(hex_digest).map_err(|_| Error::WebhookInvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::WebhookInvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| Error::WebhookInvalidSignature)
}

/// Authenticate a pushed update and turn it into a log entry.
///
/// Nothing is persisted here; a rejected update leaves no trace.
pub fn ingest(
    service: &Service,
    raw_body: &[u8],
    signature: &str,
    payload: &WebhookPayload,
    now: DateTime<Utc>,
) -> Result<StatusLog> {
    if service.service_type() != ServiceType::Webhook {
        return Err(Error::validation(format!(
            "service {:?} is not a webhook service",
            service.name
        )));
    }

    let secret = service
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::validation(format!("service {:?} has no webhook secret", service.name))
        })?;

    verify_signature(secret, raw_body, signature)?;

    let status: Status = payload.status.parse()?;

    let latency_ms = match payload.latency_ms {
        Some(latency) if latency < 0 => {
            return Err(Error::validation(format!(
                "latency must not be negative, got {}",
                latency
            )));
        }
        Some(latency) => latency,
        None => 0,
    };

    Ok(StatusLog {
        service_name: service.name.clone(),
        status,
        latency_ms,
        status_code: 0,
        error: None,
        timestamp: payload.timestamp.unwrap_or(now),
    })
}
