//! Threshold Health Evaluator
//!
//! Turns an aggregate value into a tri-state severity and decides which
//! signals to emit so that recovery is announced exactly once.
//!
//! # Reporting rules
//!
//! ```text
//! severity    active   emit            active'
//! Warning/Err   *      that severity   true
//! Ok          true     Ok (clears)     false
//! Ok          false    nothing         false
//! ```

use std::time::Duration;

use chrono::Utc;

use crate::domain::{HealthSignal, Severity};

/// Per-metric thresholds. A threshold of 0 disables that level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholdPolicy {
    pub error_threshold: f64,
    pub warning_threshold: f64,
    pub ttl: Duration,
}

/// TTL used when none is configured.
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(300);

impl HealthThresholdPolicy {
    pub fn new(error_threshold: f64, warning_threshold: f64, ttl: Duration) -> Self {
        Self {
            error_threshold,
            warning_threshold,
            ttl,
        }
    }

    /// True if neither level is enabled.
    pub fn is_disabled(&self) -> bool {
        self.threshold_for(Severity::Error).is_none()
            && self.threshold_for(Severity::Warning).is_none()
    }

    /// Threshold crossed for a severity, if that level is enabled.
    pub fn threshold_for(&self, severity: Severity) -> Option<f64> {
        let value = match severity {
            Severity::Ok => return None,
            Severity::Warning => self.warning_threshold,
            Severity::Error => self.error_threshold,
        };
        (value > 0.0).then_some(value)
    }
}

impl Default for HealthThresholdPolicy {
    fn default() -> Self {
        Self::new(0.0, 0.0, DEFAULT_HEALTH_TTL)
    }
}

/// Stable identity of a health property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub entity_id: String,
    pub property_key: String,
    pub source_key: String,
}

impl SignalKey {
    pub fn new(
        entity_id: impl Into<String>,
        property_key: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            property_key: property_key.into(),
            source_key: source_key.into(),
        }
    }
}

/// Hysteresis record for one metric, persisted across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HysteresisState {
    /// A Warning or Error is currently reported and not yet cleared
    pub active: bool,
}

impl HysteresisState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Stateless evaluator; all per-metric state lives in [`HysteresisState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdHealthEvaluator;

impl ThresholdHealthEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Classify an aggregate against a policy.
    pub fn evaluate(&self, aggregate: f64, policy: &HealthThresholdPolicy) -> Severity {
        if policy.error_threshold > 0.0 && aggregate >= policy.error_threshold {
            Severity::Error
        } else if policy.warning_threshold > 0.0 && aggregate >= policy.warning_threshold {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }

    /// Decide whether to emit a signal and update the hysteresis state.
    pub fn report(
        &self,
        severity: Severity,
        key: &SignalKey,
        ttl: Duration,
        message: impl Into<String>,
        state: &mut HysteresisState,
    ) -> Option<HealthSignal> {
        if severity.is_ok() {
            if !state.active {
                return None;
            }
            state.active = false;
        } else {
            state.active = true;
        }

        Some(HealthSignal {
            entity_id: key.entity_id.clone(),
            property_key: key.property_key.clone(),
            source_key: key.source_key.clone(),
            severity,
            message: message.into(),
            ttl,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(error: f64, warning: f64) -> HealthThresholdPolicy {
        HealthThresholdPolicy::new(error, warning, Duration::from_secs(60))
    }

    fn key() -> SignalKey {
        SignalKey::new("fabric:/App/Svc", "Svc_cpu_percent", "AppObserver(cpu_percent)")
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    #[test]
    fn test_evaluate_boundaries() {
        let evaluator = ThresholdHealthEvaluator::new();
        let p = policy(80.0, 50.0);

        assert_eq!(evaluator.evaluate(85.0, &p), Severity::Error);
        assert_eq!(evaluator.evaluate(80.0, &p), Severity::Error);
        assert_eq!(evaluator.evaluate(50.0, &p), Severity::Warning);
        assert_eq!(evaluator.evaluate(49.0, &p), Severity::Ok);
    }

    #[test]
    fn test_zero_threshold_disables_level() {
        let evaluator = ThresholdHealthEvaluator::new();

        assert_eq!(evaluator.evaluate(999.0, &policy(0.0, 50.0)), Severity::Warning);
        assert_eq!(evaluator.evaluate(999.0, &policy(80.0, 0.0)), Severity::Error);
        assert_eq!(evaluator.evaluate(60.0, &policy(80.0, 0.0)), Severity::Ok);
        assert_eq!(evaluator.evaluate(1e12, &policy(0.0, 0.0)), Severity::Ok);
    }

    #[test]
    fn test_warning_above_error_still_classifies_error_first() {
        let evaluator = ThresholdHealthEvaluator::new();
        let p = policy(50.0, 80.0);

        assert_eq!(evaluator.evaluate(90.0, &p), Severity::Error);
        assert_eq!(evaluator.evaluate(60.0, &p), Severity::Error);
    }

    #[test]
    fn test_policy_helpers() {
        let p = policy(80.0, 0.0);
        assert!(!p.is_disabled());
        assert_eq!(p.threshold_for(Severity::Error), Some(80.0));
        assert_eq!(p.threshold_for(Severity::Warning), None);
        assert_eq!(p.threshold_for(Severity::Ok), None);
        assert!(HealthThresholdPolicy::default().is_disabled());
    }

    // =========================================================================
    // Hysteresis
    // =========================================================================

    #[test]
    fn test_warning_then_ok_clears_once() {
        let evaluator = ThresholdHealthEvaluator::new();
        let mut state = HysteresisState::new();
        let ttl = Duration::from_secs(60);

        let first = evaluator
            .report(Severity::Warning, &key(), ttl, "high", &mut state)
            .expect("warning is always emitted");
        assert_eq!(first.severity, Severity::Warning);
        assert!(state.active);

        let second = evaluator
            .report(Severity::Ok, &key(), ttl, "recovered", &mut state)
            .expect("ok clears an active warning");
        assert_eq!(second.severity, Severity::Ok);
        assert_eq!(second.property_key, first.property_key);
        assert_eq!(second.source_key, first.source_key);
        assert!(!state.active);

        assert!(evaluator
            .report(Severity::Ok, &key(), ttl, "still fine", &mut state)
            .is_none());
    }

    #[test]
    fn test_ok_without_active_emits_nothing() {
        let evaluator = ThresholdHealthEvaluator::new();
        let mut state = HysteresisState::new();
        let ttl = Duration::from_secs(60);

        assert!(evaluator
            .report(Severity::Ok, &key(), ttl, "fine", &mut state)
            .is_none());
        assert!(evaluator
            .report(Severity::Ok, &key(), ttl, "fine", &mut state)
            .is_none());
        assert!(!state.active);
    }

    #[test]
    fn test_repeated_errors_always_emitted() {
        let evaluator = ThresholdHealthEvaluator::new();
        let mut state = HysteresisState::new();
        let ttl = Duration::from_secs(120);

        for _ in 0..3 {
            let signal = evaluator
                .report(Severity::Error, &key(), ttl, "critical", &mut state)
                .unwrap();
            assert_eq!(signal.severity, Severity::Error);
            assert_eq!(signal.ttl, ttl);
        }
        assert!(state.active);
    }

    #[test]
    fn test_error_to_warning_keeps_active() {
        let evaluator = ThresholdHealthEvaluator::new();
        let mut state = HysteresisState::new();
        let ttl = Duration::from_secs(60);

        evaluator.report(Severity::Error, &key(), ttl, "e", &mut state);
        let signal = evaluator
            .report(Severity::Warning, &key(), ttl, "w", &mut state)
            .unwrap();

        assert_eq!(signal.severity, Severity::Warning);
        assert!(state.active);
    }
}
