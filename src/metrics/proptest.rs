//! Property-Based Tests for Bounded Metric Buffers
//!
//! # Test Properties
//!
//! 1. **Capacity Bound**: size never exceeds capacity in either mode
//! 2. **Circular Window**: a circular buffer holds the last `capacity` samples
//! 3. **Fixed Window**: a fixed buffer holds the first `capacity` samples
//! 4. **Aggregate Bounds**: min <= average <= max on a non-empty buffer

#![cfg(test)]

use proptest::prelude::*;

use super::buffer::{BoundedMetricBuffer, BufferMode};

// =============================================================================
// Property Strategies
// =============================================================================

fn capacity_strategy() -> impl Strategy<Value = usize> {
    1usize..=64
}

fn samples_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6f64..1.0e6, 0..200)
}

fn mode_strategy() -> impl Strategy<Value = BufferMode> {
    prop_oneof![Just(BufferMode::Circular), Just(BufferMode::Fixed)]
}

// =============================================================================
// Window Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_size_never_exceeds_capacity(
        capacity in capacity_strategy(),
        mode in mode_strategy(),
        samples in samples_strategy(),
    ) {
        let mut buffer = BoundedMetricBuffer::new(capacity, mode);
        for sample in &samples {
            buffer.push(*sample);
            prop_assert!(buffer.size() <= buffer.capacity());
        }
        prop_assert_eq!(buffer.size(), samples.len().min(capacity));
    }

    #[test]
    fn prop_circular_keeps_most_recent(
        capacity in capacity_strategy(),
        samples in samples_strategy(),
    ) {
        let mut buffer = BoundedMetricBuffer::circular(capacity);
        for sample in &samples {
            buffer.push(*sample);
        }

        let start = samples.len().saturating_sub(capacity);
        let expected: Vec<f64> = samples[start..].to_vec();
        prop_assert_eq!(buffer.samples().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn prop_fixed_keeps_first_window(
        capacity in capacity_strategy(),
        samples in samples_strategy(),
    ) {
        let mut buffer = BoundedMetricBuffer::fixed(capacity);
        for sample in &samples {
            buffer.push(*sample);
        }

        let end = samples.len().min(capacity);
        let expected: Vec<f64> = samples[..end].to_vec();
        prop_assert_eq!(buffer.samples().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn prop_aggregates_are_ordered(
        capacity in capacity_strategy(),
        mode in mode_strategy(),
        samples in prop::collection::vec(-1.0e6f64..1.0e6, 1..200),
    ) {
        let mut buffer = BoundedMetricBuffer::new(capacity, mode);
        for sample in &samples {
            buffer.push(*sample);
        }

        let tolerance = 1e-6;
        prop_assert!(buffer.min() <= buffer.average() + tolerance);
        prop_assert!(buffer.average() <= buffer.max() + tolerance);
    }
}
