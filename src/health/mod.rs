//! Threshold Health
//!
//! Tri-state health decisions with hysteresis and TTL.

mod evaluator;

pub use evaluator::{
    HealthThresholdPolicy, HysteresisState, SignalKey, ThresholdHealthEvaluator,
    DEFAULT_HEALTH_TTL,
};
