//! HTTP telemetry transport
//!
//! Posts signed requests with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::trace;

use crate::domain::TelemetryTransport;
use crate::error::{Error, Result};
use crate::telemetry::{SignedTelemetryRequest, CONTENT_TYPE as JSON};

/// `TelemetryTransport` over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTelemetryTransport {
    client: Client,
}

impl HttpTelemetryTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TelemetryTransport for HttpTelemetryTransport {
    async fn post(&self, request: &SignedTelemetryRequest) -> Result<u16> {
        let response = self
            .client
            .post(request.url())
            .header(CONTENT_TYPE, JSON)
            .header("Log-Type", request.log_type())
            .header("x-ms-date", request.date())
            .header(AUTHORIZATION, request.authorization())
            .body(request.payload().to_string())
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status().as_u16();
        trace!(status, url = %request.url(), "Telemetry POST completed");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::telemetry::{SharedKey, SignedTelemetrySender, TelemetryConfig};

    const KEY: &str = "c2VjcmV0LXNoYXJlZC1rZXktZm9yLXRlc3Rz";

    fn transport() -> HttpTelemetryTransport {
        HttpTelemetryTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_post_sends_signed_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/logs"))
            .and(query_param("api-version", "2016-04-01"))
            .and(header("Content-Type", "application/json"))
            .and(header("Log-Type", "NodewatchHealth"))
            .and(header_exists("x-ms-date"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request = SignedTelemetryRequest::sign(
            format!("{}/api/logs?api-version=2016-04-01", server.uri()),
            "ws-1",
            "NodewatchHealth",
            &SharedKey::from_base64(KEY).unwrap(),
            r#"[{"metric":"cpu_percent"}]"#,
            Utc::now(),
        )
        .unwrap();

        let status = transport().post(&request).await.unwrap();
        assert_eq!(status, 200);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, br#"[{"metric":"cpu_percent"}]"#.to_vec());
        let auth = received[0].headers.get("Authorization").unwrap();
        assert_eq!(auth.to_str().unwrap(), request.authorization());
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let request = SignedTelemetryRequest::sign(
            format!("{}/api/logs", server.uri()),
            "ws-1",
            "T",
            &SharedKey::from_base64(KEY).unwrap(),
            "[]",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(transport().post(&request).await.unwrap(), 403);
    }

    #[tokio::test]
    async fn test_connection_failure_is_http_error() {
        let request = SignedTelemetryRequest::sign(
            "http://127.0.0.1:1/api/logs",
            "ws-1",
            "T",
            &SharedKey::from_base64(KEY).unwrap(),
            "[]",
            Utc::now(),
        )
        .unwrap();

        assert!(matches!(
            transport().post(&request).await,
            Err(Error::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_sender_retries_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let config = TelemetryConfig {
            enabled: true,
            workspace_id: "ws-1".into(),
            shared_key: KEY.into(),
            endpoint: Some(format!("{}/api/logs", server.uri())),
            retry_delay_ms: 10,
            ..Default::default()
        };
        let sender = SignedTelemetrySender::new(config, Arc::new(transport())).unwrap();

        let outcome = sender.send("[]", &CancellationToken::new()).await.unwrap();

        assert!(outcome.is_delivered());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }
}
