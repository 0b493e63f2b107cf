//! Infrastructure Adapters
//!
//! Implementations of the domain ports for the host the agent runs on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  CounterProvider │ HealthReporter │ TelemetryTransport     │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ SysinfoCounterProvider (+ PortTable)                       │ │
//! │  │ LoggingHealthReporter │ InMemoryHealthCollector           │ │
//! │  │ HttpTelemetryTransport                                     │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Process enumerators live in [`crate::process`] next to the resolver.

mod health_reporter;
mod http_transport;
pub mod ports;
mod sysinfo_counters;

pub use health_reporter::{InMemoryHealthCollector, LoggingHealthReporter};
pub use http_transport::HttpTelemetryTransport;
pub use ports::{PortCount, PortTable};
pub use sysinfo_counters::SysinfoCounterProvider;
