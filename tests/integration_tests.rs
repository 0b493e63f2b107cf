//! Nodewatch Integration Tests
//!
//! End-to-end flows across the public API:
//! - Configuration to running observers
//! - Health signals with hysteresis across cycles
//! - Service process families
//! - Signed telemetry delivered over HTTP

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use nodewatch::adapters::InMemoryHealthCollector;
use nodewatch::domain::{
    CounterProvider, MetricKind, ProcessDescriptor, ProcessEnumerator, SampleTarget, Severity,
};
use nodewatch::observer::{ObserverContext, ObserverSupervisor};
use nodewatch::process::ProcessFamilyResolver;
use nodewatch::{AgentConfig, Observer, Result};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeCounters {
    values: Mutex<HashMap<(MetricKind, SampleTarget), f64>>,
}

impl FakeCounters {
    fn set(&self, kind: MetricKind, target: SampleTarget, value: f64) {
        self.values.lock().insert((kind, target), value);
    }
}

impl CounterProvider for FakeCounters {
    fn sample(&self, kind: MetricKind, target: SampleTarget) -> Result<Option<f64>> {
        Ok(self.values.lock().get(&(kind, target)).copied())
    }
}

/// `(pid, parent, name)` rows.
struct FakeProcessTable(Vec<(u32, u32, &'static str)>);

impl ProcessEnumerator for FakeProcessTable {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn enumerate_direct_children(&self, pid: u32) -> Result<Vec<ProcessDescriptor>> {
        Ok(self
            .0
            .iter()
            .filter(|(_, parent, _)| *parent == pid)
            .map(|(pid, _, name)| ProcessDescriptor::new(*pid, *name))
            .collect())
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<ProcessDescriptor>> {
        Ok(self
            .0
            .iter()
            .filter(|(_, _, n)| *n == name)
            .map(|(pid, _, name)| ProcessDescriptor::new(*pid, *name))
            .collect())
    }
}

fn process_table() -> Arc<FakeProcessTable> {
    Arc::new(FakeProcessTable(vec![
        (200, 1, "api"),
        (201, 200, "api-worker"),
        (202, 201, "api-helper"),
    ]))
}

fn context(
    config: &AgentConfig,
    counters: Arc<FakeCounters>,
    reporter: Arc<InMemoryHealthCollector>,
) -> ObserverContext {
    ObserverContext {
        node_name: config.node_name.clone(),
        counters,
        resolver: ProcessFamilyResolver::with_limits(process_table(), config.resolver_limits()),
        reporter,
        sender: None,
    }
}

const CONFIG: &str = r#"
node_name: test-node
observers:
  - name: NodeObserver
    scope: node
    samples_per_cycle: 1
    metrics:
      - kind: cpu_percent
        warning_threshold: 70
        error_threshold: 90
        capacity: 1
  - name: AppObserver
    scope: services
    samples_per_cycle: 1
    targets:
      - entity_id: api
        process_name: api
    metrics:
      - kind: memory_mb
        warning_threshold: 1000
        capacity: 1
"#;

// =============================================================================
// Health Signal Flow
// =============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_node_warning_clears_exactly_once() {
        let config = AgentConfig::from_yaml(CONFIG).unwrap();
        let counters = Arc::new(FakeCounters::default());
        let reporter = Arc::new(InMemoryHealthCollector::new());
        let ctx = context(&config, counters.clone(), reporter.clone());
        let mut observer = Observer::new(config.observers[0].clone(), ctx);
        let cancel = CancellationToken::new();

        counters.set(MetricKind::CpuPercent, SampleTarget::Node, 75.0);
        observer.run_cycle(&cancel).await.unwrap();
        counters.set(MetricKind::CpuPercent, SampleTarget::Node, 95.0);
        observer.run_cycle(&cancel).await.unwrap();
        counters.set(MetricKind::CpuPercent, SampleTarget::Node, 20.0);
        observer.run_cycle(&cancel).await.unwrap();
        observer.run_cycle(&cancel).await.unwrap();

        let severities: Vec<_> = reporter.signals().iter().map(|s| s.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Warning, Severity::Error, Severity::Ok]
        );

        let keys: Vec<_> = reporter
            .signals()
            .iter()
            .map(|s| (s.property_key.clone(), s.source_key.clone()))
            .collect();
        assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(reporter.signals().iter().all(|s| s.entity_id == "test-node"));
    }

    #[tokio::test]
    async fn test_service_family_memory_is_aggregated() {
        let config = AgentConfig::from_yaml(CONFIG).unwrap();
        let counters = Arc::new(FakeCounters::default());
        let reporter = Arc::new(InMemoryHealthCollector::new());
        let ctx = context(&config, counters.clone(), reporter.clone());
        let mut observer = Observer::new(config.observers[1].clone(), ctx);

        counters.set(MetricKind::MemoryMb, SampleTarget::Process(200), 400.0);
        counters.set(MetricKind::MemoryMb, SampleTarget::Process(201), 400.0);
        counters.set(MetricKind::MemoryMb, SampleTarget::Process(202), 400.0);

        let report = observer.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.entities, 1);
        let signals = reporter.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, Severity::Warning);
        assert_eq!(signals[0].entity_id, "api");
        let channel = observer.channel("api", MetricKind::MemoryMb).unwrap();
        assert_eq!(channel.buffer().average(), 1200.0);
    }

    #[tokio::test]
    async fn test_supervisor_runs_configured_observers_once() {
        let config = AgentConfig::from_yaml(CONFIG).unwrap();
        let counters = Arc::new(FakeCounters::default());
        counters.set(MetricKind::CpuPercent, SampleTarget::Node, 99.0);
        let reporter = Arc::new(InMemoryHealthCollector::new());
        let supervisor =
            ObserverSupervisor::from_config(&config, context(&config, counters, reporter.clone()));
        let status = supervisor.status();

        let results = supervisor.run_once(CancellationToken::new()).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(ObserverSupervisor::is_ready(&status));
        // CPU breaches, the service has no samples
        assert_eq!(reporter.len(), 1);
    }
}

// =============================================================================
// Telemetry Delivery
// =============================================================================

mod telemetry_tests {
    use super::*;
    use nodewatch::adapters::HttpTelemetryTransport;
    use nodewatch::telemetry::{SignedTelemetrySender, TelemetryConfig};
    use std::time::Duration;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    fn telemetry(server: &MockServer) -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            workspace_id: "ws-test".into(),
            shared_key: KEY.into(),
            endpoint: Some(format!("{}/api/logs", server.uri())),
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_ships_signed_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/logs"))
            .and(header("Log-Type", "NodewatchHealth"))
            .and(header_exists("x-ms-date"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = AgentConfig::from_yaml(CONFIG).unwrap();
        config.telemetry = telemetry(&server);
        config.validate().unwrap();

        let transport = HttpTelemetryTransport::new(Duration::from_secs(5)).unwrap();
        let sender =
            SignedTelemetrySender::new(config.telemetry.clone(), Arc::new(transport)).unwrap();

        let counters = Arc::new(FakeCounters::default());
        counters.set(MetricKind::CpuPercent, SampleTarget::Node, 42.0);
        let reporter = Arc::new(InMemoryHealthCollector::new());
        let mut ctx = context(&config, counters, reporter.clone());
        ctx.sender = Some(Arc::new(sender));

        let mut observer = Observer::new(config.observers[0].clone(), ctx);
        let report = observer.run_cycle(&CancellationToken::new()).await.unwrap();

        assert!(report.delivery.unwrap().is_delivered());
        assert!(reporter.is_empty());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedKey ws-test:"));

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["nodeName"], "test-node");
        assert_eq!(rows[0]["observer"], "NodeObserver");
        assert_eq!(rows[0]["metric"], "cpu_percent");
        assert_eq!(rows[0]["value"], 42.0);
    }

    #[tokio::test]
    async fn test_rejected_snapshot_is_dropped_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(6)
            .mount(&server)
            .await;

        let mut config = AgentConfig::from_yaml(CONFIG).unwrap();
        config.telemetry = telemetry(&server);

        let transport = HttpTelemetryTransport::new(Duration::from_secs(5)).unwrap();
        let sender =
            SignedTelemetrySender::new(config.telemetry.clone(), Arc::new(transport)).unwrap();

        let counters = Arc::new(FakeCounters::default());
        counters.set(MetricKind::CpuPercent, SampleTarget::Node, 42.0);
        let reporter = Arc::new(InMemoryHealthCollector::new());
        let mut ctx = context(&config, counters, reporter);
        ctx.sender = Some(Arc::new(sender));

        let mut observer = Observer::new(config.observers[0].clone(), ctx);
        let report = observer.run_cycle(&CancellationToken::new()).await.unwrap();

        let delivery = report.delivery.unwrap();
        assert!(!delivery.is_delivered());
        assert_eq!(delivery.attempts(), 6);
    }
}
