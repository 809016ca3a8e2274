use crate::domain::errors::{DomainError, DomainResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Rejects events whose timestamp drifted further than this, limiting
/// replay of captured deliveries.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verifies a `Stripe-Signature` header (`t=<unix>,v1=<hex>,...`) against
/// the raw request body.
///
/// The signed payload is `"{t}.{body}"`; any of the `v1` entries may
/// match. Comparison is constant-time via the MAC verifier.
pub fn verify_webhook_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
) -> DomainResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(DomainError::SignatureVerificationFailed)?;
    if candidates.is_empty() {
        return Err(DomainError::SignatureVerificationFailed);
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(DomainError::SignatureVerificationFailed);
    }

    for candidate in candidates {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        if mac.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(DomainError::SignatureVerificationFailed)
}
