//! Per-metric channel
//!
//! A sample window, its threshold policy and its hysteresis record for one
//! `(entity, metric)` pair. Owned by exactly one observer.

use std::time::Duration;

use crate::config::MetricConfig;
use crate::domain::{HealthSignal, MetricKind, Severity};
use crate::health::{HealthThresholdPolicy, HysteresisState, SignalKey, ThresholdHealthEvaluator};
use crate::metrics::{Aggregate, BoundedMetricBuffer, BufferMode};

/// Outcome of evaluating one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvaluation {
    pub value: f64,
    pub severity: Severity,
    /// Signal to report, if hysteresis calls for one
    pub signal: Option<HealthSignal>,
}

/// Buffer, policy and hysteresis for one metric of one entity.
#[derive(Debug, Clone)]
pub struct MetricChannel {
    key: SignalKey,
    kind: MetricKind,
    buffer: BoundedMetricBuffer,
    policy: HealthThresholdPolicy,
    aggregate: Aggregate,
    hysteresis: HysteresisState,
}

impl MetricChannel {
    pub fn new(observer: &str, entity_id: &str, metric: &MetricConfig, ttl: Duration) -> Self {
        Self {
            key: signal_key(observer, entity_id, metric.kind),
            kind: metric.kind,
            buffer: BoundedMetricBuffer::new(metric.capacity, metric.buffer_mode()),
            policy: metric.policy(ttl),
            aggregate: metric.aggregate,
            hysteresis: HysteresisState::new(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn key(&self) -> &SignalKey {
        &self.key
    }

    pub fn buffer(&self) -> &BoundedMetricBuffer {
        &self.buffer
    }

    pub fn policy(&self) -> &HealthThresholdPolicy {
        &self.policy
    }

    pub fn hysteresis(&self) -> HysteresisState {
        self.hysteresis
    }

    /// Prepare for a new cycle. Fixed windows start empty every cycle;
    /// circular windows keep rolling.
    pub fn begin_cycle(&mut self) {
        if self.buffer.mode() == BufferMode::Fixed {
            self.buffer.clear();
        }
    }

    pub fn push(&mut self, value: f64) -> bool {
        self.buffer.push(value)
    }

    /// Evaluate the current window. `None` if there are no samples.
    pub fn evaluate(&mut self, evaluator: &ThresholdHealthEvaluator) -> Option<ChannelEvaluation> {
        if self.buffer.is_empty() {
            return None;
        }

        let value = self.buffer.aggregate(self.aggregate);
        let severity = evaluator.evaluate(value, &self.policy);
        let message = self.message(value, severity);
        let signal = evaluator.report(
            severity,
            &self.key,
            self.policy.ttl,
            message,
            &mut self.hysteresis,
        );

        Some(ChannelEvaluation {
            value,
            severity,
            signal,
        })
    }

    fn message(&self, value: f64, severity: Severity) -> String {
        let aggregate = match self.aggregate {
            Aggregate::Average => "average",
            Aggregate::Max => "max",
        };
        let base = format!(
            "{} {} {} is {:.2} {} over {} samples",
            self.key.entity_id,
            self.kind,
            aggregate,
            value,
            self.kind.unit(),
            self.buffer.size()
        );
        match self.policy.threshold_for(severity) {
            Some(threshold) => format!("{}, at or above the {} threshold {}", base, severity, threshold),
            None => base,
        }
    }
}

/// Stable health identity of one metric of one entity.
pub fn signal_key(observer: &str, entity_id: &str, kind: MetricKind) -> SignalKey {
    SignalKey::new(
        entity_id,
        format!("{}_{}", observer, kind.code()),
        format!("{}({})", observer, entity_id),
    )
}
