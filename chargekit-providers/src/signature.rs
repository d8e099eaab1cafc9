//! Webhook signature verification.
//!
//! Card, wallet, and back-office webhooks carry an HMAC-SHA256 signature in
//! the form `t=<unix-timestamp>,v1=<hex-digest>` over the payload
//! `"{timestamp}.{raw_body}"`. The timestamp bounds replay of captured
//! deliveries; the digest comparison is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ProviderError;

type HmacSha256 = Hmac<Sha256>;

/// Verify a signed webhook delivery.
///
/// # Arguments
///
/// * `raw_body` - the raw request body
/// * `signature` - the `t=...,v1=...` header value
/// * `secret` - the webhook signing secret
/// * `tolerance_secs` - maximum allowed clock skew between the signature
///   timestamp and now
///
/// Returns `Err(ProviderError::SignatureInvalid)` on any mismatch: malformed
/// header, stale timestamp, or wrong digest. The error carries no detail on
/// purpose; callers should not tell a prober which check failed.
pub fn verify(
    raw_body: &[u8],
    signature: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), ProviderError> {
    let (timestamp, received_hex) = split_header(signature)?;

    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).abs() > tolerance_secs {
        return Err(ProviderError::SignatureInvalid);
    }

    let expected = compute_digest(raw_body, timestamp, secret)?;
    let received = hex::decode(received_hex).map_err(|_| ProviderError::SignatureInvalid)?;

    if received.len() != expected.len() {
        return Err(ProviderError::SignatureInvalid);
    }

    // Constant-time comparison
    let mut diff = 0u8;
    for (a, b) in received.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    if diff == 0 {
        Ok(())
    } else {
        Err(ProviderError::SignatureInvalid)
    }
}

/// Produce a `t=...,v1=...` header for a payload. Used by back-office
/// tooling and tests; providers compute their side independently.
pub fn sign(raw_body: &[u8], timestamp: i64, secret: &str) -> Result<String, ProviderError> {
    let digest = compute_digest(raw_body, timestamp, secret)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}

fn split_header(signature: &str) -> Result<(i64, &str), ProviderError> {
    let mut timestamp = None;
    let mut digest = None;

    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t.parse::<i64>().map_err(|_| ProviderError::SignatureInvalid)?);
        } else if let Some(v) = part.strip_prefix("v1=") {
            digest = Some(v);
        }
    }

    match (timestamp, digest) {
        (Some(t), Some(d)) => Ok((t, d)),
        _ => Err(ProviderError::SignatureInvalid),
    }
}

fn compute_digest(raw_body: &[u8], timestamp: i64, secret: &str) -> Result<Vec<u8>, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ProviderError::SignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Ok(mac.finalize().into_bytes().to_vec())
}
