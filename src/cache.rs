//! Per-build tree cache.
//!
//! Entries are weak: a tree stays cached only while some caller still holds
//! it, and is rebuilt from its cover files on the next request after that.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::error::Result;
use crate::ingest::{ingest_files, IngestOptions};
use crate::tree::CoverageTree;

#[derive(Debug, Default)]
pub struct TreeCache {
    entries: Mutex<HashMap<String, Weak<CoverageTree>>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Weak<CoverageTree>>> {
        // The map only holds weak handles, so a panic mid-update cannot leave
        // it in a state worth refusing.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached tree of `build`, if it is still alive.
    pub fn get(&self, build: &str) -> Option<Arc<CoverageTree>> {
        self.entries().get(build).and_then(Weak::upgrade)
    }

    /// Return the live tree of `build` or build it with `load`.
    ///
    /// The lock is not held while `load` runs. If another caller cached a
    /// tree for the same build in the meantime, that tree wins.
    pub fn get_or_load<F>(&self, build: &str, load: F) -> Result<Arc<CoverageTree>>
    where
        F: FnOnce() -> Result<CoverageTree>,
    {
        if let Some(tree) = self.get(build) {
            return Ok(tree);
        }

        debug!(build, "loading coverage tree");
        let loaded = Arc::new(load()?);

        let mut entries = self.entries();
        if let Some(existing) = entries.get(build).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        entries.insert(build.to_string(), Arc::downgrade(&loaded));
        Ok(loaded)
    }

    /// Return the live tree of `build` or fold it from `paths`.
    pub fn get_or_ingest<P: AsRef<Path>>(
        &self,
        build: &str,
        paths: &[P],
        options: IngestOptions,
    ) -> Result<Arc<CoverageTree>> {
        self.get_or_load(build, || Ok(ingest_files(paths, options)?.tree))
    }

    /// Forget `build`. Returns true when an entry was present.
    pub fn evict(&self, build: &str) -> bool {
        self.entries().remove(build).is_some()
    }

    /// Drop entries whose tree is gone.
    pub fn purge(&self) {
        self.entries().retain(|_, tree| tree.strong_count() > 0);
    }

    /// Number of builds with a live tree.
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|tree| tree.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
