//! Agent self-metrics
//!
//! Counters describing the agent's own activity, exposed in Prometheus text
//! format on the metrics endpoint. They live in a private registry so the
//! process-wide default registry is left untouched.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::domain::Severity;

/// All agent counters and the registry they are registered in.
pub struct AgentStats {
    registry: Registry,
    /// Observer cycles by observer and result (ok, cancelled, failed)
    pub observer_cycles: IntCounterVec,
    /// Health signals emitted by severity
    pub health_signals: IntCounterVec,
    /// Health signals the sink refused
    pub health_report_failures: IntCounter,
    /// Telemetry deliveries by outcome (delivered, dropped)
    pub telemetry_deliveries: IntCounterVec,
    /// Individual telemetry POST attempts
    pub telemetry_attempts: IntCounter,
}

// Metric names and label sets below are constant and valid.
static STATS: Lazy<AgentStats> = Lazy::new(|| {
    let registry = Registry::new_custom(Some("nodewatch".to_string()), None)
        .expect("static registry prefix is valid");

    let observer_cycles = IntCounterVec::new(
        Opts::new("observer_cycles_total", "Observer cycles run"),
        &["observer", "result"],
    )
    .expect("static metric definition is valid");
    let health_signals = IntCounterVec::new(
        Opts::new("health_signals_total", "Health signals emitted"),
        &["severity"],
    )
    .expect("static metric definition is valid");
    let health_report_failures = IntCounter::new(
        "health_report_failures_total",
        "Health signals rejected by the health sink",
    )
    .expect("static metric definition is valid");
    let telemetry_deliveries = IntCounterVec::new(
        Opts::new("telemetry_deliveries_total", "Telemetry payload deliveries"),
        &["outcome"],
    )
    .expect("static metric definition is valid");
    let telemetry_attempts = IntCounter::new(
        "telemetry_attempts_total",
        "Telemetry POST attempts including retries",
    )
    .expect("static metric definition is valid");

    for collector in [
        Box::new(observer_cycles.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(health_signals.clone()),
        Box::new(health_report_failures.clone()),
        Box::new(telemetry_deliveries.clone()),
        Box::new(telemetry_attempts.clone()),
    ] {
        registry
            .register(collector)
            .expect("metric names are unique");
    }

    AgentStats {
        registry,
        observer_cycles,
        health_signals,
        health_report_failures,
        telemetry_deliveries,
        telemetry_attempts,
    }
});

/// Process-wide agent counters.
pub fn stats() -> &'static AgentStats {
    &STATS
}

impl AgentStats {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_cycle(&self, observer: &str, result: &str) {
        self.observer_cycles
            .with_label_values(&[observer, result])
            .inc();
    }

    pub fn record_signal(&self, severity: Severity) {
        let label = severity.to_string();
        self.health_signals.with_label_values(&[label.as_str()]).inc();
    }

    /// Render every counter in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode agent metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
