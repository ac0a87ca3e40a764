/*!
Snapshot catalog: which snapshot ids are retained for an instance.

The catalog is a FIFO window of ids kept apart from the files themselves.
Eviction deletes the files of the lowest id and drops it from the index;
surviving snapshots are never renamed or renumbered.

Only the newest `max_count` ids are visible. Ids past the bound whose files
could not be deleted yet stay indexed for the next eviction attempt but can
neither be counted, listed nor restored.
*/

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::paths::{PathResolver, SnapshotPaths};
use crate::storage::StorageAdapter;
use crate::types::SnapshotId;
use crate::Result;

/// Retained snapshot ids and the id allocator of one instance.
#[derive(Debug, Clone)]
pub struct SnapshotCatalog {
    max_count: usize,
    retained: BTreeSet<SnapshotId>,
    next_id: u64,
}

/// A retained snapshot and where its files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub id: SnapshotId,
    pub paths: SnapshotPaths,
}

impl SnapshotCatalog {
    /// Empty catalog; the first allocated id is 1.
    pub fn new(max_count: usize) -> Self {
        Self {
            max_count,
            retained: BTreeSet::new(),
            next_id: 1,
        }
    }

    /// Rebuild the catalog from the data files found in the instance directory
    ///
    /// Every `kvs_<instance>_<n>.json` with `n >= 1` counts as retained. The
    /// allocator resumes after the highest id found.
    pub fn scan<S: StorageAdapter>(
        storage: &S,
        paths: &PathResolver,
        max_count: usize,
    ) -> Result<Self> {
        let mut catalog = Self::new(max_count);
        for name in storage.list(paths.dir())? {
            if let Some(id) = paths.parse_data_file_name(&name) {
                if !id.is_current() {
                    catalog.retained.insert(id);
                }
            }
        }
        if let Some(highest) = catalog.retained.iter().next_back() {
            catalog.next_id = highest.0 + 1;
        }
        debug!(
            instance = %paths.instance_id(),
            retained = catalog.retained.len(),
            next_id = catalog.next_id,
            "scanned snapshot catalog"
        );
        Ok(catalog)
    }

    /// Number of snapshots visible to callers, capped at the configured maximum.
    pub fn current_count(&self) -> usize {
        self.window().count()
    }

    /// The configured retention bound.
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// True if `id` is one of the newest `max_count` retained snapshots.
    pub fn contains(&self, id: SnapshotId) -> bool {
        self.window().any(|&retained| retained == id)
    }

    /// Id the next flush will allocate.
    pub fn next_id(&self) -> SnapshotId {
        SnapshotId(self.next_id)
    }

    pub fn newest(&self) -> Option<SnapshotId> {
        self.window().next_back().copied()
    }

    pub fn oldest(&self) -> Option<SnapshotId> {
        self.window().next().copied()
    }

    /// Visible snapshots in ascending id order.
    pub fn list(&self, paths: &PathResolver) -> Vec<SnapshotEntry> {
        self.window()
            .map(|&id| SnapshotEntry {
                id,
                paths: paths.resolve(id),
            })
            .collect()
    }

    fn window(&self) -> impl DoubleEndedIterator<Item = &SnapshotId> {
        let excess = self.retained.len().saturating_sub(self.max_count);
        self.retained.iter().skip(excess)
    }

    /// Register the snapshot a flush has just committed.
    pub(crate) fn record(&mut self, id: SnapshotId) {
        self.retained.insert(id);
        self.next_id = self.next_id.max(id.0 + 1);
    }

    /// Ids that exceed the retention bound, oldest first.
    pub(crate) fn over_limit(&self) -> Vec<SnapshotId> {
        let excess = self.retained.len().saturating_sub(self.max_count);
        self.retained.iter().take(excess).copied().collect()
    }

    /// Evict the oldest snapshots until the retention bound holds
    ///
    /// The data file goes first: once it is gone the snapshot is no longer
    /// restorable and the id leaves the index. A leftover hash file is only
    /// logged; the next scan removes it.
    ///
    /// # Returns
    /// The evicted ids, or the error that stopped eviction. Ids not yet
    /// evicted stay in the catalog.
    pub fn rotate<S: StorageAdapter>(
        &mut self,
        storage: &S,
        paths: &PathResolver,
    ) -> Result<Vec<SnapshotId>> {
        let mut evicted = Vec::new();
        for id in self.over_limit() {
            let files = paths.resolve(id);
            storage.delete(&files.data)?;
            self.retained.remove(&id);
            if let Err(e) = storage.delete(&files.hash) {
                warn!(
                    snapshot_id = %id,
                    hash_path = %files.hash.display(),
                    error = %e,
                    "evicted snapshot left its hash file behind"
                );
            }
            debug!(snapshot_id = %id, "evicted snapshot");
            evicted.push(id);
        }
        Ok(evicted)
    }
}
