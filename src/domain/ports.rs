//! Domain Ports (Port/Adapter Pattern)
//!
//! Capability traits the monitoring core depends on, plus the value objects
//! that cross them. Platform adapters implement these traits and are selected
//! once at startup, then passed explicitly to the components that need them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Monitoring Core                        │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │ CounterProvider │ ProcessEnumerator │ HealthReporter │    │
//! │  │               TelemetryTransport                     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  SysinfoCounterProvider │ NativeEnumerator │ TextToolEnum.  │
//! │  LoggingHealthReporter  │ HttpTelemetryTransport            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::telemetry::SignedTelemetryRequest;

use super::signals::HealthSignal;

// =============================================================================
// Value Objects
// =============================================================================

/// Identity of a live process at the time it was observed.
///
/// Carries no OS handle; the pid may be reused once the process exits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub name: String,
}

impl ProcessDescriptor {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ProcessDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.pid)
    }
}

/// A root process plus its bounded list of discovered descendants.
///
/// Built fresh on every resolution; process trees are too volatile to cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessFamily {
    pub root: ProcessDescriptor,
    pub descendants: Vec<ProcessDescriptor>,
}

impl ProcessFamily {
    pub fn new(root: ProcessDescriptor, descendants: Vec<ProcessDescriptor>) -> Self {
        Self { root, descendants }
    }

    /// Family with no discovered descendants.
    pub fn single(root: ProcessDescriptor) -> Self {
        Self::new(root, Vec::new())
    }

    /// Root pid followed by every descendant pid, in discovery order.
    pub fn pids(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.root.pid).chain(self.descendants.iter().map(|d| d.pid))
    }

    /// Number of processes in the family, root included.
    pub fn len(&self) -> usize {
        1 + self.descendants.len()
    }

    /// A family always has a root.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Scope a metric is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    /// Whole machine
    Node,
    /// A service process and (optionally) its descendants
    Services,
}

/// Resource dimension an observer samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CpuPercent,
    MemoryMb,
    MemoryPercent,
    ActivePorts,
    EphemeralPorts,
    Handles,
    Threads,
}

impl MetricKind {
    /// Every metric kind, in reporting order.
    pub const ALL: [MetricKind; 7] = [
        MetricKind::CpuPercent,
        MetricKind::MemoryMb,
        MetricKind::MemoryPercent,
        MetricKind::ActivePorts,
        MetricKind::EphemeralPorts,
        MetricKind::Handles,
        MetricKind::Threads,
    ];

    /// Stable code used in health property keys and telemetry records.
    pub fn code(&self) -> &'static str {
        match self {
            MetricKind::CpuPercent => "cpu_percent",
            MetricKind::MemoryMb => "memory_mb",
            MetricKind::MemoryPercent => "memory_percent",
            MetricKind::ActivePorts => "active_ports",
            MetricKind::EphemeralPorts => "ephemeral_ports",
            MetricKind::Handles => "handles",
            MetricKind::Threads => "threads",
        }
    }

    /// Unit suffix for messages.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::CpuPercent | MetricKind::MemoryPercent => "%",
            MetricKind::MemoryMb => "MB",
            MetricKind::ActivePorts | MetricKind::EphemeralPorts => "ports",
            MetricKind::Handles => "handles",
            MetricKind::Threads => "threads",
        }
    }

    /// Whether this metric can be measured in the given scope.
    pub fn supports(&self, scope: MetricScope) -> bool {
        match scope {
            MetricScope::Services => true,
            MetricScope::Node => !matches!(self, MetricKind::Threads),
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What a single counter read is taken against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleTarget {
    Node,
    Process(u32),
}

// =============================================================================
// Counter Port
// =============================================================================

/// Port for raw OS counters.
///
/// Reads are synchronous. A transient condition (process exited, access
/// denied, counter absent) is reported as `Ok(None)`; only a genuinely
/// unexpected failure is an `Err`.
pub trait CounterProvider: Send + Sync {
    /// Read one counter.
    fn sample(&self, kind: MetricKind, target: SampleTarget) -> Result<Option<f64>>;

    /// Refresh any cached OS state before a sampling round.
    fn refresh(&self) {}
}

// =============================================================================
// Process Enumeration Port
// =============================================================================

/// Port for discovering processes.
///
/// Implementations apply the configured denylist before returning.
pub trait ProcessEnumerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Direct children of `pid`. A pid that no longer exists has no children.
    fn enumerate_direct_children(&self, pid: u32) -> Result<Vec<ProcessDescriptor>>;

    /// Live processes whose name matches `name`, lowest pid first.
    fn find_by_name(&self, name: &str) -> Result<Vec<ProcessDescriptor>>;
}

// =============================================================================
// Health Reporting Port
// =============================================================================

/// Port for the platform health subsystem.
///
/// A failed report is logged by the caller and dropped; it is never retried.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn report(&self, signal: &HealthSignal) -> Result<()>;
}

// =============================================================================
// Telemetry Transport Port
// =============================================================================

/// Port for posting a signed telemetry request.
///
/// Returns the HTTP status code of the response. Transport failures are
/// errors; non-success status codes are not.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    async fn post(&self, request: &SignedTelemetryRequest) -> Result<u16>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_family_pids_root_first() {
        let family = ProcessFamily::new(
            ProcessDescriptor::new(10, "svc"),
            vec![
                ProcessDescriptor::new(11, "worker"),
                ProcessDescriptor::new(12, "worker"),
            ],
        );

        assert_eq!(family.pids().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(family.len(), 3);
        assert!(!family.is_empty());
    }

    #[test]
    fn test_process_descriptor_display() {
        assert_eq!(ProcessDescriptor::new(7, "dotnet").to_string(), "dotnet(7)");
    }

    #[test]
    fn test_metric_kind_scope_support() {
        assert!(MetricKind::Threads.supports(MetricScope::Services));
        assert!(!MetricKind::Threads.supports(MetricScope::Node));
        assert!(MetricKind::CpuPercent.supports(MetricScope::Node));
    }

    #[test]
    fn test_metric_kind_serde_codes_match() {
        for kind in MetricKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }
}
