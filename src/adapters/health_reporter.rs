//! Health Reporter Adapters
//!
//! Implements the `HealthReporter` port with logging and in-memory backends.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::{HealthReporter, HealthSignal, Severity};
use crate::error::{Error, Result};

/// Logging-based health reporter.
///
/// Writes each signal to the tracing system at a level matching its
/// severity. Used when the agent runs outside a platform health subsystem.
#[derive(Debug, Clone, Default)]
pub struct LoggingHealthReporter;

impl LoggingHealthReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HealthReporter for LoggingHealthReporter {
    async fn report(&self, signal: &HealthSignal) -> Result<()> {
        let ttl_secs = signal.ttl.as_secs();
        match signal.severity {
            Severity::Ok => info!(
                entity = %signal.entity_id,
                property = %signal.property_key,
                source = %signal.source_key,
                ttl_secs,
                "Health cleared: {}", signal.message
            ),
            Severity::Warning => warn!(
                entity = %signal.entity_id,
                property = %signal.property_key,
                source = %signal.source_key,
                ttl_secs,
                "Health warning: {}", signal.message
            ),
            Severity::Error => error!(
                entity = %signal.entity_id,
                property = %signal.property_key,
                source = %signal.source_key,
                ttl_secs,
                "Health error: {}", signal.message
            ),
        }
        Ok(())
    }
}

/// In-memory health signal collector for testing.
///
/// Keeps every accepted signal for later inspection. Can be switched into a
/// failing mode to exercise the report-failure path.
#[derive(Debug, Default)]
pub struct InMemoryHealthCollector {
    signals: parking_lot::RwLock<Vec<HealthSignal>>,
    failing: std::sync::atomic::AtomicBool,
}

impl InMemoryHealthCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected signals.
    pub fn signals(&self) -> Vec<HealthSignal> {
        self.signals.read().clone()
    }

    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.read().is_empty()
    }

    pub fn clear(&self) {
        self.signals.write().clear();
    }

    /// Signals reported for one property.
    pub fn signals_for(&self, property_key: &str) -> Vec<HealthSignal> {
        self.signals
            .read()
            .iter()
            .filter(|s| s.property_key == property_key)
            .cloned()
            .collect()
    }

    /// Reject every following report.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthReporter for InMemoryHealthCollector {
    async fn report(&self, signal: &HealthSignal) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::HealthReport(format!(
                "collector rejected {}",
                signal.property_key
            )));
        }
        self.signals.write().push(signal.clone());
        Ok(())
    }
}
