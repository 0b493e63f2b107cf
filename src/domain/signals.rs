//! Health Signals
//!
//! Severity-tagged reports handed to the platform health subsystem. The
//! `(property_key, source_key)` pair is the identity the platform uses to
//! correlate a later `Ok` with an earlier `Warning` or `Error`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Ok,
    Warning,
    Error,
}

impl Severity {
    pub fn is_ok(&self) -> bool {
        *self == Severity::Ok
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Ok => write!(f, "Ok"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// A single health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub entity_id: String,
    pub property_key: String,
    pub source_key: String,
    pub severity: Severity,
    pub message: String,
    #[serde(with = "ttl_seconds")]
    pub ttl: Duration,
    pub timestamp: DateTime<Utc>,
}

mod ttl_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
