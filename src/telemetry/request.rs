//! Signed telemetry requests

use chrono::{DateTime, Utc};

use crate::error::Result;

use super::signature::{authorization_header, build_signature, rfc1123_date, SharedKey};

/// HTTP method used for delivery.
pub const METHOD: &str = "POST";

/// Content type of every payload.
pub const CONTENT_TYPE: &str = "application/json";

/// Resource path that is signed.
pub const RESOURCE_PATH: &str = "/api/logs";

/// A fully signed, immutable delivery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTelemetryRequest {
    url: String,
    log_type: String,
    date: String,
    signature: String,
    authorization: String,
    payload: String,
    timestamp: DateTime<Utc>,
}

impl SignedTelemetryRequest {
    /// Sign `payload` for delivery at `timestamp`.
    pub fn sign(
        url: impl Into<String>,
        workspace_id: &str,
        log_type: impl Into<String>,
        key: &SharedKey,
        payload: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let payload = payload.into();
        let date = rfc1123_date(timestamp);
        let signature = build_signature(
            key,
            METHOD,
            payload.len(),
            CONTENT_TYPE,
            &date,
            RESOURCE_PATH,
        )?;
        let authorization = authorization_header(workspace_id, &signature);

        Ok(Self {
            url: url.into(),
            log_type: log_type.into(),
            date,
            signature,
            authorization,
            payload,
            timestamp,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Value of the `Log-Type` header.
    pub fn log_type(&self) -> &str {
        &self.log_type
    }

    /// Value of the `x-ms-date` header.
    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Body length in bytes, as signed.
    pub fn content_length(&self) -> usize {
        self.payload.len()
    }
}
