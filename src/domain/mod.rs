//! Domain Layer
//!
//! Value objects and capability ports shared by the monitoring core.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for OS counters, process
//!   enumeration, health reporting and telemetry transport
//! - **Signals** (`signals.rs`) - Health severities and signals
//!
//! # Usage
//!
//! ```ignore
//! use nodewatch::domain::{CounterProvider, MetricKind, SampleTarget};
//!
//! fn node_cpu<C: CounterProvider>(counters: &C) -> nodewatch::Result<Option<f64>> {
//!     counters.sample(MetricKind::CpuPercent, SampleTarget::Node)
//! }
//! ```

pub mod ports;
pub mod signals;

pub use ports::{
    // Port traits
    CounterProvider,
    HealthReporter,
    // Value objects
    MetricKind,
    MetricScope,
    ProcessDescriptor,
    ProcessEnumerator,
    ProcessFamily,
    SampleTarget,
    TelemetryTransport,
};
pub use signals::{HealthSignal, Severity};
