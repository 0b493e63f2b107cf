//! Process name denylist
//!
//! Shells, console hosts and service hosts that get spawned under a service
//! but would pollute its resource accounting.

use std::collections::HashSet;

use crate::domain::ProcessDescriptor;

/// Names filtered out of enumeration results by default.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "conhost",
    "csrss",
    "svchost",
    "wininit",
    "lsass",
    "cmd",
    "powershell",
    "pwsh",
    "sh",
    "bash",
    "dash",
    "sleep",
    "ps",
    "timeout",
];

/// Case-insensitive set of process names to ignore.
///
/// Matching ignores a trailing `.exe`, so `conhost` and `conhost.exe` are the
/// same entry.
#[derive(Debug, Clone, Default)]
pub struct ProcessDenylist {
    names: HashSet<String>,
}

impl ProcessDenylist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| normalize(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// The stock denylist.
    pub fn defaults() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }

    /// An empty denylist that filters nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize(name))
    }

    /// Drop denied descriptors, preserving order.
    pub fn retain(&self, mut processes: Vec<ProcessDescriptor>) -> Vec<ProcessDescriptor> {
        if !self.names.is_empty() {
            processes.retain(|p| !self.contains(&p.name));
        }
        processes
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn normalize(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_is_case_and_suffix_insensitive() {
        let denylist = ProcessDenylist::new(["ConHost.exe", "bash"]);

        assert!(denylist.contains("conhost"));
        assert!(denylist.contains("CONHOST.EXE"));
        assert!(denylist.contains("bash.exe"));
        assert!(!denylist.contains("dotnet"));
    }

    #[test]
    fn test_retain_preserves_order() {
        let denylist = ProcessDenylist::new(["sh"]);
        let kept = denylist.retain(vec![
            ProcessDescriptor::new(3, "worker"),
            ProcessDescriptor::new(1, "sh"),
            ProcessDescriptor::new(2, "helper"),
        ]);

        let pids: Vec<u32> = kept.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![3, 2]);
    }

    #[test]
    fn test_empty_denylist_filters_nothing() {
        let denylist = ProcessDenylist::empty();
        assert!(denylist.is_empty());
        assert_eq!(
            denylist
                .retain(vec![ProcessDescriptor::new(1, "sh")])
                .len(),
            1
        );
    }

    #[test]
    fn test_default_list() {
        let denylist = ProcessDenylist::defaults();
        assert_eq!(denylist.len(), DEFAULT_DENYLIST.len());
        assert!(denylist.contains("svchost.exe"));
    }
}
