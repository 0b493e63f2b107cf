//! Nodewatch - Node and Service Health Monitoring Agent
//!
//! Periodic observers sample OS resource counters for a node or for service
//! process families, compare rolling aggregates against thresholds, report
//! health signals with exactly-once recovery, and ship signed telemetry to a
//! log-ingestion endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Counters   │──▶│   Metric     │──▶│  Threshold   │──▶│    Health    │
//! │  + Process   │   │   Buffers    │   │  Evaluator   │   │   Reporter   │
//! │   Families   │   │              │   │ (hysteresis) │   │              │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                                               │
//!                                               ▼
//!                                       ┌──────────────┐
//!                                       │    Signed    │
//!                                       │  Telemetry   │
//!                                       └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - OS counters, health reporters and the HTTP transport
//! - [`config`] - YAML agent configuration
//! - [`domain`] - Ports and value objects
//! - [`error`] - Error types
//! - [`health`] - Threshold evaluation and hysteresis
//! - [`metrics`] - Bounded sample buffers
//! - [`observer`] - Observer run loop and supervisor
//! - [`process`] - Bounded process family discovery
//! - [`stats`] - Agent self-metrics
//! - [`telemetry`] - Shared-key signed telemetry delivery

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod metrics;
pub mod observer;
pub mod process;
pub mod stats;
pub mod telemetry;

// Re-export commonly used types
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use health::ThresholdHealthEvaluator;
pub use metrics::BoundedMetricBuffer;
pub use observer::{Observer, ObserverContext, ObserverSupervisor};
pub use process::ProcessFamilyResolver;
pub use telemetry::SignedTelemetrySender;
