//! Bounded Metric Buffer
//!
//! Fixed-capacity sample window for one metric with order-independent
//! aggregate statistics.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Behavior when a push arrives at a full buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    /// Evict the oldest sample, then append
    #[default]
    Circular,
    /// Drop the new sample and keep the original window
    Fixed,
}

/// Which statistic a health decision is taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Average,
    Max,
}

/// Rolling window of numeric samples.
///
/// `len() <= capacity()` always holds. Aggregates on an empty buffer return
/// 0.0; callers must check `is_empty()` before using them for a decision.
/// Not synchronized; each buffer has exactly one owner.
#[derive(Debug, Clone)]
pub struct BoundedMetricBuffer {
    capacity: usize,
    mode: BufferMode,
    samples: VecDeque<f64>,
}

impl BoundedMetricBuffer {
    /// Create a buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize, mode: BufferMode) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            mode,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn circular(capacity: usize) -> Self {
        Self::new(capacity, BufferMode::Circular)
    }

    pub fn fixed(capacity: usize) -> Self {
        Self::new(capacity, BufferMode::Fixed)
    }

    /// Add a sample. Returns false if the sample was not stored, either
    /// because a fixed buffer is full or because the value is not finite.
    pub fn push(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }

        if self.samples.len() >= self.capacity {
            match self.mode {
                BufferMode::Circular => {
                    self.samples.pop_front();
                }
                BufferMode::Fixed => return false,
            }
        }

        self.samples.push_back(value);
        true
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn max(&self) -> f64 {
        self.samples
            .iter()
            .copied()
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    pub fn min(&self) -> f64 {
        self.samples
            .iter()
            .copied()
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Aggregate selected by configuration.
    pub fn aggregate(&self, aggregate: Aggregate) -> f64 {
        match aggregate {
            Aggregate::Average => self.average(),
            Aggregate::Max => self.max(),
        }
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Samples oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(buffer: &BoundedMetricBuffer) -> Vec<f64> {
        buffer.samples().collect()
    }

    // =========================================================================
    // Push Semantics
    // =========================================================================

    #[test]
    fn test_circular_evicts_oldest() {
        let mut buffer = BoundedMetricBuffer::circular(5);
        for v in 1..=7 {
            assert!(buffer.push(v as f64));
        }

        assert_eq!(contents(&buffer), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buffer.average(), 5.0);
        assert_eq!(buffer.size(), 5);
    }

    #[test]
    fn test_fixed_keeps_warm_up_window() {
        let mut buffer = BoundedMetricBuffer::fixed(3);
        let stored: Vec<bool> = (1..=5).map(|v| buffer.push(v as f64)).collect();

        assert_eq!(stored, vec![true, true, true, false, false]);
        assert_eq!(contents(&buffer), vec![1.0, 2.0, 3.0]);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_below_capacity_appends_in_both_modes() {
        for mode in [BufferMode::Circular, BufferMode::Fixed] {
            let mut buffer = BoundedMetricBuffer::new(4, mode);
            buffer.push(1.0);
            buffer.push(2.0);
            assert_eq!(contents(&buffer), vec![1.0, 2.0]);
            assert!(!buffer.is_full());
        }
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let mut buffer = BoundedMetricBuffer::circular(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(1.0);
        buffer.push(2.0);
        assert_eq!(contents(&buffer), vec![2.0]);
    }

    #[test]
    fn test_non_finite_samples_rejected() {
        let mut buffer = BoundedMetricBuffer::circular(3);
        assert!(!buffer.push(f64::NAN));
        assert!(!buffer.push(f64::INFINITY));
        assert!(buffer.is_empty());
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    #[test]
    fn test_empty_aggregates_are_zero() {
        let buffer = BoundedMetricBuffer::fixed(3);
        assert_eq!(buffer.average(), 0.0);
        assert_eq!(buffer.max(), 0.0);
        assert_eq!(buffer.min(), 0.0);
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_min_max_average() {
        let mut buffer = BoundedMetricBuffer::circular(10);
        for v in [4.0, -2.0, 10.0, 8.0] {
            buffer.push(v);
        }

        assert_eq!(buffer.min(), -2.0);
        assert_eq!(buffer.max(), 10.0);
        assert_eq!(buffer.average(), 5.0);
        assert_eq!(buffer.aggregate(Aggregate::Average), 5.0);
        assert_eq!(buffer.aggregate(Aggregate::Max), 10.0);
    }

    #[test]
    fn test_clear_keeps_capacity_and_mode() {
        let mut buffer = BoundedMetricBuffer::fixed(2);
        buffer.push(1.0);
        buffer.push(2.0);
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(buffer.mode(), BufferMode::Fixed);
        assert!(buffer.push(3.0));
    }

    #[test]
    fn test_mode_deserializes_snake_case() {
        let mode: BufferMode = serde_yaml::from_str("fixed").unwrap();
        assert_eq!(mode, BufferMode::Fixed);
        let agg: Aggregate = serde_yaml::from_str("max").unwrap();
        assert_eq!(agg, Aggregate::Max);
    }
}
