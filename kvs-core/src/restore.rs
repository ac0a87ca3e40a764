/*!
Restore engine: integrity-checked reads of retained snapshots.

Restoring never modifies a snapshot or the catalog. The caller receives the
verified bytes and swaps them into the live state itself.
*/

use tracing::error;

use crate::engine::SnapshotEngine;
use crate::integrity::Digest;
use crate::storage::StorageAdapter;
use crate::types::SnapshotId;
use crate::{KvsError, Result};

impl<S: StorageAdapter> SnapshotEngine<S> {
    /// Read the content of a retained snapshot
    ///
    /// # Errors
    /// * `KvsError::InvalidSnapshotId` - id 0, never allocated or already evicted
    /// * `KvsError::NotFound` - a file of the snapshot disappeared
    /// * `KvsError::Corruption` / `KvsError::MalformedHash` - integrity check failed
    pub fn restore(&self, snapshot_id: SnapshotId) -> Result<Vec<u8>> {
        self.ensure_restorable(snapshot_id)?;
        let (data, _) = self.read_verified(&self.resolve(snapshot_id))?;
        Ok(data)
    }

    /// Run the restore checks without returning the content
    ///
    /// # Returns
    /// The verified digest of the snapshot
    pub fn verify(&self, snapshot_id: SnapshotId) -> Result<Digest> {
        self.ensure_restorable(snapshot_id)?;
        let (_, digest) = self.read_verified(&self.resolve(snapshot_id))?;
        Ok(digest)
    }

    fn ensure_restorable(&self, snapshot_id: SnapshotId) -> Result<()> {
        if snapshot_id.is_current() {
            error!("tried to restore current KVS as snapshot");
            return Err(KvsError::InvalidSnapshotId);
        }
        if !self.catalog.contains(snapshot_id) {
            error!(snapshot_id = %snapshot_id, "tried to restore a non-existing snapshot");
            return Err(KvsError::InvalidSnapshotId);
        }
        Ok(())
    }
}
