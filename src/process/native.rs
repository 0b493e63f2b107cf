//! Native process enumeration
//!
//! Uses the OS process table through `sysinfo` without spawning any helper
//! processes.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

use crate::domain::{ProcessDescriptor, ProcessEnumerator};
use crate::error::Result;

use super::denylist::ProcessDenylist;

/// Process enumerator backed by a native process snapshot.
///
/// Every call takes a fresh snapshot of the process table; parent links are
/// only meaningful at the instant they are read.
pub struct NativeEnumerator {
    system: Mutex<System>,
    denylist: ProcessDenylist,
}

impl NativeEnumerator {
    pub fn new(denylist: ProcessDenylist) -> Self {
        Self {
            system: Mutex::new(System::new()),
            denylist,
        }
    }

    fn snapshot<F>(&self, select: F) -> Vec<ProcessDescriptor>
    where
        F: Fn(&sysinfo::Process) -> bool,
    {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        let mut matches: Vec<ProcessDescriptor> = system
            .processes()
            .values()
            .filter(|p| select(p))
            .map(|p| {
                ProcessDescriptor::new(p.pid().as_u32(), p.name().to_string_lossy().to_string())
            })
            .collect();

        // The process table is unordered; pids give a stable order.
        matches.sort_by_key(|p| p.pid);
        matches
    }
}

impl ProcessEnumerator for NativeEnumerator {
    fn name(&self) -> &'static str {
        "native"
    }

    fn enumerate_direct_children(&self, pid: u32) -> Result<Vec<ProcessDescriptor>> {
        let parent = Pid::from_u32(pid);
        let children = self.snapshot(|p| p.parent() == Some(parent));
        trace!(pid, count = children.len(), "native children");
        Ok(self.denylist.retain(children))
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<ProcessDescriptor>> {
        let wanted = name.to_ascii_lowercase();
        let wanted_exe = format!("{}.exe", wanted);
        Ok(self.snapshot(|p| {
            let actual = p.name().to_string_lossy().to_ascii_lowercase();
            actual == wanted || actual == wanted_exe
        }))
    }
}

impl std::fmt::Debug for NativeEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEnumerator")
            .field("denylist_len", &self.denylist.len())
            .finish()
    }
}
