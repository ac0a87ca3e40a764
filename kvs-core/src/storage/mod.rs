/*!
Storage adapters for store and snapshot files.

This module defines the storage abstraction (port) used by the persistence
writer, the restore engine and the snapshot catalog, plus the local filesystem
adapter. Writes are two-phase: a file is first staged under a temporary name
next to its target and only becomes visible under its final name on commit.
*/

pub mod local;

pub use local::LocalFileStorage;

use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::Result;

/// A fully written and synced temporary file awaiting its rename.
///
/// Dropping a staged file without committing it removes the temporary.
#[derive(Debug)]
pub struct StagedFile {
    pub(crate) temp: NamedTempFile,
    pub(crate) target: PathBuf,
}

impl StagedFile {
    /// Final path the file will be renamed to.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Current temporary location.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }
}

/// Storage abstraction for the files of a store instance
///
/// Implementations must make [`commit`](StorageAdapter::commit) atomic with
/// respect to readers: a reader sees either the previous content of the target
/// or the complete staged content, never a mix.
pub trait StorageAdapter {
    /// Write `data` to a temporary file next to `target` and sync it
    ///
    /// # Arguments
    /// * `data` - Complete file content
    /// * `target` - Final path the content is destined for
    ///
    /// # Returns
    /// The staged file, or an error; nothing is visible under `target` yet
    fn stage(&self, data: &[u8], target: &Path) -> Result<StagedFile>;

    /// Atomically move a staged file onto its target
    fn commit(&self, staged: StagedFile) -> Result<()>;

    /// Read a whole file
    ///
    /// # Returns
    /// The file bytes, [`KvsError::NotFound`](crate::KvsError::NotFound) when absent
    fn load(&self, path: &Path) -> Result<Vec<u8>>;

    /// Check whether a file exists
    fn exists(&self, path: &Path) -> bool;

    /// Atomically move an existing file onto `to`, replacing any file there
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file; deleting an absent file succeeds
    fn delete(&self, path: &Path) -> Result<()>;

    /// File names directly inside `dir`; a missing directory lists as empty
    fn list(&self, dir: &Path) -> Result<Vec<String>>;

    /// Stage and commit in one step.
    fn write_atomic(&self, data: &[u8], target: &Path) -> Result<()> {
        let staged = self.stage(data, target)?;
        self.commit(staged)
    }
}
