//! Metrics module
//!
//! Per-metric sample windows used by observers.

pub mod buffer;
mod proptest;

pub use buffer::{Aggregate, BoundedMetricBuffer, BufferMode};
