//! Stripe webhook signature scheme.
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>,v1=<hex>`. Each `v1` is
//! `hex(HMAC-SHA256(secret, "{t}.{raw body}"))`; any one matching is enough, and `t` must be
//! within the tolerance window of the local clock.
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Stripe's own libraries default to five minutes.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is empty")]
    EmptyHeader,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has an invalid timestamp")]
    InvalidTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("timestamp is outside the tolerance window")]
    Stale,
    #[error("no signature matches the payload")]
    Mismatch,
}

fn compute_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    if header.trim().is_empty() {
        return Err(SignatureError::EmptyHeader);
    }

    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = Some(value),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    let ts = timestamp
        .parse::<i64>()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let expected = compute_signature(payload, secret, timestamp);
    let matched = signatures
        .iter()
        .any(|sig| bool::from(expected.as_bytes().ct_eq(sig.as_bytes())));
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    if (now - ts).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    Ok(())
}

/// Builds a header Stripe would send for `payload` at `timestamp`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let ts = timestamp.to_string();
    format!("t={},v1={}", ts, compute_signature(payload, secret, &ts))
}
