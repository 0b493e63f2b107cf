//! Observers
//!
//! Periodic probes that sample counters into per-metric channels, evaluate
//! health and ship telemetry.
//!
//! # Components
//!
//! - [`Observer`] - one probe and its run loop
//! - [`MetricChannel`] - buffer, policy and hysteresis for one entity metric
//! - [`ObserverSupervisor`] - runs observers concurrently under one token

mod channel;
mod runner;
mod supervisor;

pub use channel::{signal_key, ChannelEvaluation, MetricChannel};
pub use runner::{CycleReport, Observer, ObserverContext, ObserverStatus, StatusMap};
pub use supervisor::ObserverSupervisor;
