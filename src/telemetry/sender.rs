//! Signed Telemetry Sender
//!
//! Best-effort delivery of JSON payloads to a log-ingestion endpoint with a
//! bounded, fixed-delay retry loop.
//!
//! # Delivery loop
//!
//! ```text
//! attempt ──▶ 200/202 ──▶ Delivered
//!    │
//!    └─ other status / transport error
//!          │
//!          ├─ retries < max_retries ──▶ wait retry_delay ──▶ attempt
//!          └─ otherwise ──▶ warn, Dropped
//! ```
//!
//! Cancellation is checked before every attempt and before every wait, and
//! races every in-flight request. A cancelled send returns
//! `Error::Cancelled` without logging a failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::domain::TelemetryTransport;
use crate::error::{Error, Result};
use crate::stats::stats;

use super::request::SignedTelemetryRequest;
use super::signature::SharedKey;

/// Retries after the first attempt.
pub const MAX_RETRIES: u32 = 5;

/// Fixed wait between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the telemetry sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Send telemetry at all
    pub enabled: bool,

    /// Workspace identifier, also the endpoint subdomain
    pub workspace_id: String,

    /// Base64 shared key
    pub shared_key: String,

    /// Value of the `Log-Type` header
    pub log_type: String,

    /// Ingestion host, appended to the workspace id
    pub sink_host: String,

    /// Ingestion API version
    pub api_version: String,

    /// Full ingestion URL, replacing the one built from workspace and host
    pub endpoint: Option<String>,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Wait between attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workspace_id: String::new(),
            shared_key: String::new(),
            log_type: "NodewatchHealth".to_string(),
            sink_host: "ods.opinsights.azure.com".to_string(),
            api_version: "2016-04-01".to_string(),
            endpoint: None,
            max_retries: MAX_RETRIES,
            retry_delay_ms: RETRY_DELAY.as_millis() as u64,
            timeout_secs: 30,
        }
    }
}

impl TelemetryConfig {
    /// `https://{workspace}.{host}/api/logs?api-version={version}`
    pub fn endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        format!(
            "https://{}.{}{}?api-version={}",
            self.workspace_id,
            self.sink_host,
            super::request::RESOURCE_PATH,
            self.api_version
        )
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Delivery Outcome
// =============================================================================

/// Result of one `send` call. Neither variant is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Dropped { attempts } => {
                *attempts
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

// =============================================================================
// Sender
// =============================================================================

/// Signs and delivers telemetry payloads.
pub struct SignedTelemetrySender {
    config: TelemetryConfig,
    key: SharedKey,
    endpoint: String,
    transport: Arc<dyn TelemetryTransport>,
}

impl SignedTelemetrySender {
    /// Create a sender. Fails if the shared key is not valid base64.
    pub fn new(config: TelemetryConfig, transport: Arc<dyn TelemetryTransport>) -> Result<Self> {
        let key = SharedKey::from_base64(&config.shared_key)?;
        let endpoint = config.endpoint();

        Ok(Self {
            config,
            key,
            endpoint,
            transport,
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Sign a payload with the current time.
    pub fn sign(&self, payload: &str) -> Result<SignedTelemetryRequest> {
        SignedTelemetryRequest::sign(
            self.endpoint.clone(),
            &self.config.workspace_id,
            self.config.log_type.clone(),
            &self.key,
            payload,
            Utc::now(),
        )
    }

    /// Deliver `payload`, retrying on failure.
    ///
    /// Only returns an error when cancelled.
    #[instrument(skip(self, payload, cancel), fields(bytes = payload.len()))]
    pub async fn send(&self, payload: &str, cancel: &CancellationToken) -> Result<DeliveryOutcome> {
        let mut retry_count: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Re-signed per attempt so the date header stays fresh.
            let request = match self.sign(payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to sign telemetry payload, dropping it: {}", e);
                    stats()
                        .telemetry_deliveries
                        .with_label_values(&["dropped"])
                        .inc();
                    return Ok(DeliveryOutcome::Dropped {
                        attempts: retry_count,
                    });
                }
            };

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.transport.post(&request) => result,
            };
            stats().telemetry_attempts.inc();
            let attempts = retry_count + 1;

            match attempt {
                Ok(200) | Ok(202) => {
                    debug!(attempts, "Telemetry delivered");
                    stats()
                        .telemetry_deliveries
                        .with_label_values(&["delivered"])
                        .inc();
                    return Ok(DeliveryOutcome::Delivered { attempts });
                }
                Ok(status) => {
                    debug!(attempts, status, "Telemetry endpoint rejected payload");
                }
                Err(e) => {
                    debug!(attempts, "Telemetry transport failed: {}", e);
                }
            }

            if retry_count >= self.config.max_retries {
                warn!(
                    attempts,
                    endpoint = %self.endpoint,
                    "Telemetry delivery failed after {} retries, dropping payload",
                    retry_count
                );
                stats()
                    .telemetry_deliveries
                    .with_label_values(&["dropped"])
                    .inc();
                return Ok(DeliveryOutcome::Dropped { attempts });
            }
            retry_count += 1;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
            }
        }
    }
}

impl std::fmt::Debug for SignedTelemetrySender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTelemetrySender")
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Transport that replays scripted responses and records requests.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<u16>>>,
        fallback: u16,
        requests: Mutex<Vec<SignedTelemetryRequest>>,
    }

    impl ScriptedTransport {
        fn always(status: u16) -> Self {
            Self {
                fallback: status,
                ..Default::default()
            }
        }

        fn scripted(responses: Vec<Result<u16>>, fallback: u16) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fallback,
                ..Default::default()
            }
        }

        fn attempts(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl TelemetryTransport for ScriptedTransport {
        async fn post(&self, request: &SignedTelemetryRequest) -> Result<u16> {
            self.requests.lock().push(request.clone());
            match self.responses.lock().pop_front() {
                Some(response) => response,
                None => Ok(self.fallback),
            }
        }
    }

    /// Transport that never answers.
    struct HangingTransport;

    #[async_trait]
    impl TelemetryTransport for HangingTransport {
        async fn post(&self, _request: &SignedTelemetryRequest) -> Result<u16> {
            std::future::pending().await
        }
    }

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            workspace_id: "ws-test".into(),
            shared_key: "c2VjcmV0LXNoYXJlZC1rZXktZm9yLXRlc3Rz".into(),
            ..Default::default()
        }
    }

    fn sender(transport: Arc<dyn TelemetryTransport>) -> SignedTelemetrySender {
        SignedTelemetrySender::new(config(), transport).unwrap()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_endpoint_format() {
        assert_eq!(
            config().endpoint(),
            "https://ws-test.ods.opinsights.azure.com/api/logs?api-version=2016-04-01"
        );

        let overridden = TelemetryConfig {
            endpoint: Some("http://127.0.0.1:9000/api/logs".into()),
            ..config()
        };
        assert_eq!(overridden.endpoint(), "http://127.0.0.1:9000/api/logs");
    }

    #[test]
    fn test_invalid_key_rejected_at_construction() {
        let config = TelemetryConfig {
            shared_key: "%%%".into(),
            ..config()
        };
        let result = SignedTelemetrySender::new(config, Arc::new(ScriptedTransport::always(200)));
        assert_matches!(result, Err(Error::InvalidSharedKey(_)));
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        for status in [200u16, 202] {
            let transport = Arc::new(ScriptedTransport::always(status));
            let outcome = sender(transport.clone())
                .send("[]", &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
            assert_eq!(transport.attempts(), 1);
        }
    }

    #[tokio::test]
    async fn test_request_carries_signed_headers() {
        let transport = Arc::new(ScriptedTransport::always(200));
        sender(transport.clone())
            .send(r#"[{"a":1}]"#, &CancellationToken::new())
            .await
            .unwrap();

        let requests = transport.requests.lock();
        let request = &requests[0];
        assert_eq!(request.payload(), r#"[{"a":1}]"#);
        assert_eq!(request.log_type(), "NodewatchHealth");
        assert!(request.authorization().starts_with("SharedKey ws-test:"));
        assert!(request.url().starts_with("https://ws-test."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(ScriptedTransport::scripted(
            vec![
                Ok(500),
                Err(Error::Telemetry("connection reset".into())),
                Ok(429),
            ],
            202,
        ));

        let outcome = sender(transport.clone())
            .send("[]", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 4 });
        assert_eq!(transport.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_drops_after_six_attempts() {
        let transport = Arc::new(ScriptedTransport::always(503));
        let sender = sender(transport.clone());
        let started = tokio::time::Instant::now();

        let outcome = sender.send("[]", &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Dropped { attempts: 6 });
        assert_eq!(transport.attempts(), 6);
        // Five fixed one-second waits between six attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        // A fresh call starts counting from zero again.
        let outcome = sender.send("[]", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.attempts(), 6);
        assert_eq!(transport.attempts(), 12);
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[tokio::test]
    async fn test_cancelled_before_send_makes_no_attempt() {
        let transport = Arc::new(ScriptedTransport::always(200));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = sender(transport.clone()).send("[]", &cancel).await;

        assert_matches!(result, Err(Error::Cancelled));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_wait_stops_retries() {
        let transport = Arc::new(ScriptedTransport::always(500));
        let sender = sender(transport.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        let result = sender.send("[]", &cancel).await;

        assert_matches!(result, Err(Error::Cancelled));
        // Attempts at t=0s and t=1s; cancelled while waiting for t=2s.
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_request() {
        let sender = sender(Arc::new(HangingTransport));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert_matches!(sender.send("[]", &cancel).await, Err(Error::Cancelled));
    }
}
