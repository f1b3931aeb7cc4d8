//! HMAC-SHA256 verification of GitHub webhook deliveries (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `SignatureError` values.
pub enum SignatureError {
    #[error("webhook signature header is missing")]
    Missing,
    #[error("signature must use sha256=<hex> format")]
    UnsupportedFormat,
    #[error("invalid signature digest: {0}")]
    MalformedDigest(String),
    #[error("webhook secret cannot be used as an hmac key")]
    InvalidSecret,
    #[error("signature verification failed")]
    Mismatch,
}

impl SignatureError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "missing_signature",
            _ => "invalid_signature",
        }
    }
}

/// Verify `signature_header` (`sha256=<hex>`) against `payload` keyed by `secret`.
/// The comparison runs in constant time.
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: &str,
) -> Result<(), SignatureError> {
    let header = signature_header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::Missing)?;
    let digest_hex = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::UnsupportedFormat)?;
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(payload);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| SignatureError::Mismatch)
}

/// Render the `sha256=<hex>` header value GitHub would send for `payload`.
pub fn sign_webhook_payload(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    Ok(format!(
        "sha256={}",
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()
    ))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, SignatureError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SignatureError::MalformedDigest(
            "signature digest cannot be empty".to_string(),
        ));
    }
    if !trimmed.len().is_multiple_of(2) {
        return Err(SignatureError::MalformedDigest(
            "signature digest must have an even number of hex characters".to_string(),
        ));
    }
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);
    let mut index = 0usize;
    while index < trimmed.len() {
        let next = index.saturating_add(2);
        let chunk = trimmed.get(index..next).ok_or_else(|| {
            SignatureError::MalformedDigest("signature digest must be ascii hex".to_string())
        })?;
        let byte = u8::from_str_radix(chunk, 16).map_err(|_| {
            SignatureError::MalformedDigest(format!("invalid hex byte '{chunk}'"))
        })?;
        bytes.push(byte);
        index = next;
    }
    Ok(bytes)
}
