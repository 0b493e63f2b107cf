//! OS counter adapter
//!
//! Implements `CounterProvider` with `sysinfo` for CPU, memory and threads,
//! and with [`PortTable`] for ports and handles.

use std::collections::HashSet;

use parking_lot::Mutex;
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind,
    System,
};
use tracing::warn;

use crate::domain::{CounterProvider, MetricKind, SampleTarget};
use crate::error::Result;

use super::ports::{PortCount, PortTable};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Counter provider backed by a cached `sysinfo::System`.
///
/// `refresh()` updates the cache once per sampling round; `sample()` reads
/// from it. Process CPU is a delta between two refreshes, so a process first
/// seen by the latest refresh has no CPU reading yet.
pub struct SysinfoCounterProvider {
    system: Mutex<System>,
    /// Pids present in both of the last two refreshes
    cpu_primed: Mutex<HashSet<Pid>>,
    ports: PortTable,
}

impl SysinfoCounterProvider {
    pub fn new() -> Self {
        Self::with_port_table(PortTable::default())
    }

    pub fn with_port_table(ports: PortTable) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
                .with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Self {
            system: Mutex::new(system),
            cpu_primed: Mutex::new(HashSet::new()),
            ports,
        }
    }

    fn cpu_count(system: &System) -> f64 {
        system.cpus().len().max(1) as f64
    }

    fn node_sample(&self, kind: MetricKind) -> Option<f64> {
        let system = self.system.lock();
        match kind {
            MetricKind::CpuPercent => Some(system.global_cpu_usage() as f64),
            MetricKind::MemoryMb => Some(system.used_memory() as f64 / BYTES_PER_MB),
            MetricKind::MemoryPercent => {
                let total = system.total_memory();
                (total > 0).then(|| system.used_memory() as f64 * 100.0 / total as f64)
            }
            // Threads is not a node metric; ports and handles come from procfs.
            MetricKind::Threads
            | MetricKind::ActivePorts
            | MetricKind::EphemeralPorts
            | MetricKind::Handles => None,
        }
    }

    fn process_sample(&self, kind: MetricKind, pid: u32) -> Option<f64> {
        let system = self.system.lock();
        let pid = Pid::from_u32(pid);
        let process = system.process(pid)?;
        match kind {
            // Per-core percentages, normalized to the whole machine.
            MetricKind::CpuPercent => self
                .cpu_primed
                .lock()
                .contains(&pid)
                .then(|| process.cpu_usage() as f64 / Self::cpu_count(&system)),
            MetricKind::MemoryMb => Some(process.memory() as f64 / BYTES_PER_MB),
            MetricKind::MemoryPercent => {
                let total = system.total_memory();
                (total > 0).then(|| process.memory() as f64 * 100.0 / total as f64)
            }
            MetricKind::Threads => process.tasks().map(|tasks| tasks.len().max(1) as f64),
            MetricKind::ActivePorts | MetricKind::EphemeralPorts | MetricKind::Handles => None,
        }
    }

    fn port_sample(&self, which: PortCount, pid: Option<u32>) -> Option<f64> {
        match self.ports.count(which, pid) {
            Ok(value) => value,
            Err(e) => {
                warn!(?pid, "Port count unavailable: {}", e);
                None
            }
        }
    }
}

impl Default for SysinfoCounterProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterProvider for SysinfoCounterProvider {
    fn sample(&self, kind: MetricKind, target: SampleTarget) -> Result<Option<f64>> {
        let pid = match target {
            SampleTarget::Node => None,
            SampleTarget::Process(pid) => Some(pid),
        };

        let value = match kind {
            MetricKind::ActivePorts => self.port_sample(PortCount::Active, pid),
            MetricKind::EphemeralPorts => self.port_sample(PortCount::Ephemeral, pid),
            MetricKind::Handles => self.ports.handles(pid),
            _ => match pid {
                None => self.node_sample(kind),
                Some(pid) => self.process_sample(kind, pid),
            },
        };

        Ok(value)
    }

    fn refresh(&self) {
        let mut system = self.system.lock();
        let previous: HashSet<Pid> = system.processes().keys().copied().collect();
        system.refresh_cpu_usage();
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_tasks(),
        );

        *self.cpu_primed.lock() = system
            .processes()
            .keys()
            .filter(|pid| previous.contains(pid))
            .copied()
            .collect();
    }
}

impl std::fmt::Debug for SysinfoCounterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoCounterProvider")
            .field("ports", &self.ports)
            .finish()
    }
}
