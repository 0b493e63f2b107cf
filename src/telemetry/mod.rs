//! Telemetry
//!
//! Shared-key signed delivery of per-cycle metric snapshots to a
//! log-ingestion endpoint.

mod request;
mod sender;
mod signature;
mod snapshot;

pub use request::{SignedTelemetryRequest, CONTENT_TYPE, METHOD, RESOURCE_PATH};
pub use sender::{DeliveryOutcome, SignedTelemetrySender, TelemetryConfig, MAX_RETRIES, RETRY_DELAY};
pub use signature::{authorization_header, build_signature, canonical_string, rfc1123_date, SharedKey};
pub use snapshot::{MetricRecord, TelemetrySnapshot};
