//! Agent configuration
//!
//! A single YAML document describes the node, the process denylist, the
//! telemetry sink and every observer with its targets and metrics.
//!
//! ```yaml
//! node_name: node-1
//! telemetry:
//!   enabled: true
//!   workspace_id: 00000000-0000-0000-0000-000000000000
//!   shared_key: c2VjcmV0
//! observers:
//!   - name: NodeObserver
//!     scope: node
//!     metrics:
//!       - kind: cpu_percent
//!         warning_threshold: 80
//!         error_threshold: 95
//!   - name: AppObserver
//!     scope: services
//!     targets:
//!       - entity_id: fabric:/App/Web
//!         process_name: web
//!     metrics:
//!       - kind: memory_mb
//!         error_threshold: 2048
//!         aggregate: max
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{MetricKind, MetricScope};
use crate::error::{Error, Result};
use crate::health::HealthThresholdPolicy;
use crate::metrics::{Aggregate, BufferMode};
use crate::process::{ProcessDenylist, ResolverLimits, DEFAULT_DENYLIST, MAX_DEPTH, MAX_DESCENDANTS};
use crate::telemetry::{SharedKey, TelemetryConfig};

/// Slack added to a derived health TTL so signals outlive one late cycle.
pub const TTL_SLACK: Duration = Duration::from_secs(60);

// =============================================================================
// Agent
// =============================================================================

/// Top-level agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Node name stamped on telemetry records
    pub node_name: String,

    /// Process names ignored during family discovery
    pub process_denylist: Vec<String>,

    /// Process family walk bounds
    pub resolver: ResolverConfig,

    /// Telemetry sink
    pub telemetry: TelemetryConfig,

    /// Observers to run
    pub observers: Vec<ObserverConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            process_denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            resolver: ResolverConfig::default(),
            telemetry: TelemetryConfig::default(),
            observers: Vec::new(),
        }
    }
}

fn default_node_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

impl AgentConfig {
    /// Parse a YAML document. Does not validate.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the agent cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.resolver.max_descendants == 0 {
            return Err(Error::Config(
                "resolver.max_descendants must be greater than 0".to_string(),
            ));
        }

        if self.telemetry.enabled {
            if self.telemetry.workspace_id.trim().is_empty() {
                return Err(Error::Config(
                    "telemetry.workspace_id is required when telemetry is enabled".to_string(),
                ));
            }
            if self.telemetry.shared_key.trim().is_empty() {
                return Err(Error::Config(
                    "telemetry.shared_key is required when telemetry is enabled".to_string(),
                ));
            }
            SharedKey::from_base64(&self.telemetry.shared_key)?;
        }

        let mut names = HashSet::new();
        for observer in &self.observers {
            observer.validate()?;
            if !names.insert(observer.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate observer name '{}'",
                    observer.name
                )));
            }
        }

        Ok(())
    }

    pub fn denylist(&self) -> ProcessDenylist {
        ProcessDenylist::new(&self.process_denylist)
    }

    pub fn resolver_limits(&self) -> ResolverLimits {
        ResolverLimits {
            max_descendants: self.resolver.max_descendants,
            max_depth: self.resolver.max_depth,
        }
    }

    /// Observers with `enabled: true`.
    pub fn enabled_observers(&self) -> impl Iterator<Item = &ObserverConfig> {
        self.observers.iter().filter(|o| o.enabled)
    }
}

/// Bounds on the process family walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_descendants: usize,
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_descendants: MAX_DESCENDANTS,
            max_depth: MAX_DEPTH,
        }
    }
}

// =============================================================================
// Observers
// =============================================================================

/// One periodic probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Unique name, also the health source prefix
    pub name: String,

    pub enabled: bool,

    /// Whole node or a set of service processes
    pub scope: MetricScope,

    /// Service processes to watch; ignored for node scope
    pub targets: Vec<TargetConfig>,

    /// Minimum time between cycle starts
    pub run_interval_secs: u64,

    /// Sampling rounds per cycle
    pub samples_per_cycle: usize,

    /// Pause between sampling rounds
    pub sample_interval_ms: u64,

    /// Health signal TTL; derived from the intervals when absent
    pub health_ttl_secs: Option<u64>,

    pub metrics: Vec<MetricConfig>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            scope: MetricScope::Node,
            targets: Vec::new(),
            run_interval_secs: 60,
            samples_per_cycle: 3,
            sample_interval_ms: 1000,
            health_ttl_secs: None,
            metrics: Vec::new(),
        }
    }
}

impl ObserverConfig {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Wall time spent sampling within one cycle.
    pub fn sampling_span(&self) -> Duration {
        self.sample_interval()
            .saturating_mul(self.samples_per_cycle.saturating_sub(1) as u32)
    }

    /// Configured TTL, or run interval + sampling span + [`TTL_SLACK`].
    pub fn health_ttl(&self) -> Duration {
        match self.health_ttl_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.run_interval() + self.sampling_span() + TTL_SLACK,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("observer name must not be empty".to_string()));
        }
        if self.run_interval_secs == 0 {
            return Err(Error::Config(format!(
                "observer '{}': run_interval_secs must be greater than 0",
                self.name
            )));
        }
        if self.samples_per_cycle == 0 {
            return Err(Error::Config(format!(
                "observer '{}': samples_per_cycle must be greater than 0",
                self.name
            )));
        }

        if self.scope == MetricScope::Services {
            if self.targets.is_empty() {
                return Err(Error::Config(format!(
                    "observer '{}': services scope requires at least one target",
                    self.name
                )));
            }
            let mut entities = HashSet::new();
            for target in &self.targets {
                if target.process_name.is_none() && target.pid.is_none() {
                    return Err(Error::Config(format!(
                        "observer '{}': target '{}' needs a process_name or pid",
                        self.name, target.entity_id
                    )));
                }
                if !entities.insert(target.entity_id.as_str()) {
                    return Err(Error::Config(format!(
                        "observer '{}': duplicate target entity_id '{}'",
                        self.name, target.entity_id
                    )));
                }
            }
        }

        // One channel per (entity, kind).
        let mut kinds = HashSet::new();
        for metric in &self.metrics {
            if !kinds.insert(metric.kind) {
                return Err(Error::Config(format!(
                    "observer '{}': duplicate metric {}",
                    self.name, metric.kind
                )));
            }
            if metric.capacity == 0 {
                return Err(Error::Config(format!(
                    "observer '{}': metric {} has zero capacity",
                    self.name, metric.kind
                )));
            }
            if !metric.kind.supports(self.scope) {
                return Err(Error::Config(format!(
                    "observer '{}': metric {} is not available for {:?} scope",
                    self.name, metric.kind, self.scope
                )));
            }
        }

        Ok(())
    }
}

/// A service process to watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Entity the health signals attach to
    pub entity_id: String,

    /// Process name to locate the root by
    #[serde(default)]
    pub process_name: Option<String>,

    /// Fixed root pid, preferred over the name when both are set
    #[serde(default)]
    pub pid: Option<u32>,

    /// Aggregate descendants into the root's samples
    #[serde(default = "default_true")]
    pub include_children: bool,
}

fn default_true() -> bool {
    true
}

/// One metric sampled by an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub kind: MetricKind,

    /// 0 disables the warning level
    #[serde(default)]
    pub warning_threshold: f64,

    /// 0 disables the error level
    #[serde(default)]
    pub error_threshold: f64,

    /// Samples kept in the window
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Evict the oldest sample when full instead of dropping new ones
    #[serde(default = "default_true")]
    pub circular: bool,

    #[serde(default)]
    pub aggregate: Aggregate,
}

fn default_capacity() -> usize {
    30
}

impl MetricConfig {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            warning_threshold: 0.0,
            error_threshold: 0.0,
            capacity: default_capacity(),
            circular: true,
            aggregate: Aggregate::default(),
        }
    }

    pub fn buffer_mode(&self) -> BufferMode {
        if self.circular {
            BufferMode::Circular
        } else {
            BufferMode::Fixed
        }
    }

    pub fn policy(&self, ttl: Duration) -> HealthThresholdPolicy {
        HealthThresholdPolicy::new(self.error_threshold, self.warning_threshold, ttl)
    }
}
