//! Shared-key request signing
//!
//! ```text
//! canonical = "{method}\n{content_length}\n{content_type}\nx-ms-date:{date}\n{resource}"
//! signature = base64(HMAC-SHA256(base64_decode(shared_key), utf8(canonical)))
//! Authorization: SharedKey {workspace_id}:{signature}
//! ```
//!
//! The construction is a pure function of its inputs; the date string is the
//! only input that varies between otherwise identical requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Decoded shared secret. Never printed.
#[derive(Clone)]
pub struct SharedKey(Vec<u8>);

impl SharedKey {
    /// Decode a base64 shared key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidSharedKey(e.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::InvalidSharedKey("key is empty".into()));
        }
        Ok(Self(bytes))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.0).map_err(|e| Error::InvalidSharedKey(e.to_string()))
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

/// String that gets signed.
pub fn canonical_string(
    method: &str,
    content_length: usize,
    content_type: &str,
    date: &str,
    resource: &str,
) -> String {
    format!(
        "{}\n{}\n{}\nx-ms-date:{}\n{}",
        method, content_length, content_type, date, resource
    )
}

/// Base64 HMAC-SHA256 signature of the canonical string.
pub fn build_signature(
    key: &SharedKey,
    method: &str,
    content_length: usize,
    content_type: &str,
    date: &str,
    resource: &str,
) -> Result<String> {
    let canonical = canonical_string(method, content_length, content_type, date, resource);
    let mut mac = key.mac()?;
    mac.update(canonical.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Value of the `Authorization` header.
pub fn authorization_header(workspace_id: &str, signature: &str) -> String {
    format!("SharedKey {}:{}", workspace_id, signature)
}

/// RFC 1123 date as used in the `x-ms-date` header.
pub fn rfc1123_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
