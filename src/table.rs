//! Bidirectional bookkeeping between kernel watch handles and watched paths.
//!
//! The table itself is not synchronized; the watcher keeps it behind the same
//! mutex that guards the shutdown phase.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use crate::events::{WatchHandle, WatchMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEntry {
    pub handle: WatchHandle,
    pub mask: WatchMask,
}

/// Handle <-> path mapping. Both maps are kept mutual inverses.
#[derive(Debug, Default)]
pub struct WatchTable {
    paths: HashMap<PathBuf, WatchEntry>,
    handles: HashMap<WatchHandle, PathBuf>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&WatchEntry> {
        self.paths.get(path)
    }

    /// Records a successful add-watch. Any stale entry for the same path, or
    /// another path the kernel folded onto the same handle, is replaced.
    ///
    /// Returns the path that lost its entry because it shared the handle.
    pub fn insert(&mut self, path: PathBuf, handle: WatchHandle, mask: WatchMask) -> Option<PathBuf> {
        if let Some(old) = self.paths.remove(&path) {
            self.handles.remove(&old.handle);
        }

        let displaced = match self.handles.remove(&handle) {
            Some(other) if other != path => {
                self.paths.remove(&other);
                Some(other)
            }
            _ => None,
        };

        self.handles.insert(handle, path.clone());
        self.paths.insert(path, WatchEntry { handle, mask });
        displaced
    }

    /// Drops the entry for `path`, returning its handle.
    pub fn remove(&mut self, path: &Path) -> Option<WatchHandle> {
        let entry = self.paths.remove(path)?;
        self.handles.remove(&entry.handle);
        Some(entry.handle)
    }

    pub fn resolve(&self, handle: WatchHandle) -> Option<&Path> {
        self.handles.get(&handle).map(PathBuf::as_path)
    }

    /// Drops the entry for a handle the kernel has already discarded.
    pub fn remove_by_handle(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.handles.remove(&handle)?;
        self.paths.remove(&path);
        Some(path)
    }

    /// Point-in-time copy of every live handle.
    pub fn snapshot_handles(&self) -> HashSet<WatchHandle> {
        self.handles.keys().copied().collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.handles.is_empty()
    }

    /// Whether the two maps are exact inverses of each other.
    pub fn is_consistent(&self) -> bool {
        self.paths.len() == self.handles.len()
            && self
                .paths
                .iter()
                .all(|(path, entry)| self.handles.get(&entry.handle) == Some(path))
    }
}
