/*!
Local filesystem storage adapter implementation.
*/

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StagedFile, StorageAdapter};
use crate::{KvsError, Result};

/// Local filesystem storage adapter
///
/// Staged files are created in the target's directory as
/// `.<target file name>.<random>.tmp`, written, fsynced and then renamed over
/// the target. The parent directory is fsynced after every rename so the new
/// name survives a power loss.
///
/// # Example
/// ```rust
/// use kvs_core::storage::{LocalFileStorage, StorageAdapter};
///
/// let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::new();
/// let target = dir.path().join("kvs_0_0.json");
/// storage.write_atomic(b"{}", &target)?;
/// assert_eq!(storage.load(&target)?, b"{}");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalFileStorage {
    /// Skip fsync calls; only for benchmarks on throwaway directories
    skip_sync: bool,
}

impl LocalFileStorage {
    pub fn new() -> Self {
        Self { skip_sync: false }
    }

    /// Adapter that never fsyncs. Commits stay atomic but not durable.
    pub fn without_sync() -> Self {
        Self { skip_sync: true }
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self, path: &Path) -> Result<PathBuf> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            fs::create_dir_all(&parent)?;
        }
        Ok(parent)
    }

    fn sync_dir(&self, dir: &Path) -> Result<()> {
        if self.skip_sync {
            return Ok(());
        }
        #[cfg(unix)]
        fs::File::open(dir)?.sync_all()?;
        #[cfg(not(unix))]
        let _ = dir;
        Ok(())
    }
}

impl StorageAdapter for LocalFileStorage {
    fn stage(&self, data: &[u8], target: &Path) -> Result<StagedFile> {
        let parent = self.ensure_parent_dir(target)?;
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                KvsError::validation(format!("no file name in {}", target.display()))
            })?;

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&parent)?;
        temp.write_all(data)?;
        temp.flush()?;
        if !self.skip_sync {
            temp.as_file().sync_all()?;
        }

        debug!(
            target = %target.display(),
            temp = %temp.path().display(),
            bytes = data.len(),
            "staged file"
        );
        Ok(StagedFile {
            temp,
            target: target.to_path_buf(),
        })
    }

    fn commit(&self, staged: StagedFile) -> Result<()> {
        let StagedFile { temp, target } = staged;
        temp.persist(&target).map_err(|e| KvsError::Io(e.error))?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.sync_dir(parent)?;
        }
        debug!(target = %target.display(), "committed file");
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| KvsError::from_io(e, path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| KvsError::from_io(e, from))?;
        if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.sync_dir(parent)?;
        }
        debug!(from = %from.display(), to = %to.display(), "renamed file");
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KvsError::Io(e)),
        }
    }

    fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KvsError::Io(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        let path = temp_dir.path().join("kvs_0_0.json");

        storage.write_atomic(b"{\"a\": 1}", &path).unwrap();
        assert!(storage.exists(&path));
        assert_eq!(storage.load(&path).unwrap(), b"{\"a\": 1}");

        storage.delete(&path).unwrap();
        assert!(!storage.exists(&path));
    }

    #[test]
    fn test_staged_file_invisible_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        let path = temp_dir.path().join("kvs_0_0.json");
        storage.write_atomic(b"old", &path).unwrap();

        let staged = storage.stage(b"new", &path).unwrap();
        assert_eq!(staged.target(), path.as_path());
        assert!(staged.temp_path().exists());
        assert_eq!(storage.load(&path).unwrap(), b"old");

        storage.commit(staged).unwrap();
        assert_eq!(storage.load(&path).unwrap(), b"new");
    }

    #[test]
    fn test_dropped_stage_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        let path = temp_dir.path().join("kvs_0_1.json");

        let staged = storage.stage(b"abandoned", &path).unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        drop(staged);

        assert!(!temp_path.exists());
        assert!(!path.exists());
        assert!(storage.list(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_stage_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        let path = temp_dir.path().join("nested/store/kvs_0_0.json");

        storage.write_atomic(b"{}", &path).unwrap();
        assert!(storage.exists(&path));
    }

    #[test]
    fn test_load_nonexistent_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        let path = temp_dir.path().join("nonexistent.json");

        match storage.load(&path) {
            Err(KvsError::NotFound(p)) => assert_eq!(p, path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_rename_replaces_target() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        let from = temp_dir.path().join("kvs_0_0.json");
        let to = temp_dir.path().join("kvs_0_1.json");
        storage.write_atomic(b"current", &from).unwrap();
        storage.write_atomic(b"stale", &to).unwrap();

        storage.rename(&from, &to).unwrap();
        assert!(!storage.exists(&from));
        assert_eq!(storage.load(&to).unwrap(), b"current");

        match storage.rename(&from, &to) {
            Err(KvsError::NotFound(p)) => assert_eq!(p, from),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_missing_file_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        assert!(storage.delete(&temp_dir.path().join("gone.hash")).is_ok());
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new();
        assert!(storage
            .list(&temp_dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }
}
