//! Process Family Resolver
//!
//! Breadth-first, level-bounded walk of a process's descendants.
//!
//! # Algorithm
//!
//! ```text
//! level 1:   children(root)                     ── truncate at cap, return
//! level 2-5: for pid in previous level (in discovery order):
//!                append children(pid) one by one ── stop at cap
//!            a level that adds nothing ends the walk
//! ```
//!
//! A node whose children cannot be queried is treated as a leaf; the walk
//! continues with its siblings. Only cancellation aborts the walk.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::domain::{ProcessDescriptor, ProcessEnumerator, ProcessFamily};
use crate::error::{Error, Result};

/// Maximum number of descendants returned for one root.
pub const MAX_DESCENDANTS: usize = 50;

/// Maximum number of levels walked below the root.
pub const MAX_DEPTH: usize = 5;

/// Bounds on a single walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverLimits {
    pub max_descendants: usize,
    pub max_depth: usize,
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self {
            max_descendants: MAX_DESCENDANTS,
            max_depth: MAX_DEPTH,
        }
    }
}

/// Resolves the bounded descendant tree of a process.
///
/// Holds no state between calls and may be shared across tasks.
#[derive(Clone)]
pub struct ProcessFamilyResolver {
    enumerator: Arc<dyn ProcessEnumerator>,
    limits: ResolverLimits,
}

impl ProcessFamilyResolver {
    pub fn new(enumerator: Arc<dyn ProcessEnumerator>) -> Self {
        Self::with_limits(enumerator, ResolverLimits::default())
    }

    pub fn with_limits(enumerator: Arc<dyn ProcessEnumerator>, limits: ResolverLimits) -> Self {
        Self { enumerator, limits }
    }

    pub fn limits(&self) -> ResolverLimits {
        self.limits
    }

    pub fn enumerator(&self) -> &Arc<dyn ProcessEnumerator> {
        &self.enumerator
    }

    /// Live descendants of `root_pid`, in discovery order.
    ///
    /// Pid 0 is not a valid root and yields an empty list. The only error is
    /// `Error::Cancelled`.
    #[instrument(skip(self, cancel), fields(enumerator = self.enumerator.name()))]
    pub fn descendants(
        &self,
        root_pid: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProcessDescriptor>> {
        if root_pid == 0 {
            return Ok(Vec::new());
        }

        let cap = self.limits.max_descendants;
        if cap == 0 || self.limits.max_depth == 0 {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<u32> = HashSet::from([root_pid]);
        let mut found: Vec<ProcessDescriptor> = Vec::new();

        // Level 1: direct children, truncated in one step.
        let mut level: Vec<ProcessDescriptor> = self
            .children_of(root_pid, cancel)?
            .into_iter()
            .filter(|p| seen.insert(p.pid))
            .collect();

        if level.len() >= cap {
            level.truncate(cap);
            debug!(root_pid, count = cap, "descendant cap reached at first level");
            return Ok(level);
        }
        found.extend(level.iter().cloned());

        // Levels 2..=max_depth
        for depth in 2..=self.limits.max_depth {
            let mut next_level = Vec::new();

            for parent in &level {
                for child in self.children_of(parent.pid, cancel)? {
                    if !seen.insert(child.pid) {
                        continue;
                    }
                    found.push(child.clone());
                    next_level.push(child);

                    if found.len() >= cap {
                        debug!(root_pid, depth, count = cap, "descendant cap reached");
                        return Ok(found);
                    }
                }
            }

            if next_level.is_empty() {
                break;
            }
            level = next_level;
        }

        debug!(root_pid, count = found.len(), "resolved descendants");
        Ok(found)
    }

    /// Root plus its bounded descendants.
    pub fn resolve(
        &self,
        root: ProcessDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ProcessFamily> {
        let descendants = self.descendants(root.pid, cancel)?;
        Ok(ProcessFamily::new(root, descendants))
    }

    /// Direct children of one node. Failures become an empty result.
    fn children_of(&self, pid: u32, cancel: &CancellationToken) -> Result<Vec<ProcessDescriptor>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.enumerator.enumerate_direct_children(pid) {
            Ok(children) => Ok(children),
            Err(e) => {
                warn!(
                    pid,
                    enumerator = self.enumerator.name(),
                    "Failed to enumerate children, treating as leaf: {}",
                    e
                );
                Ok(Vec::new())
            }
        }
    }
}

impl std::fmt::Debug for ProcessFamilyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessFamilyResolver")
            .field("enumerator", &self.enumerator.name())
            .field("limits", &self.limits)
            .finish()
    }
}
