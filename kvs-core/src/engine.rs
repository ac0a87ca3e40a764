/*!
Per-instance snapshot engine.

The engine owns the storage adapter, the path resolver and the snapshot catalog
of one store instance. Flushing lives in [`crate::writer`], restoring in
[`crate::restore`]; this module covers opening, crash recovery and verified
reads.
*/

use std::path::Path;
use tracing::{debug, warn};

use crate::catalog::{SnapshotCatalog, SnapshotEntry};
use crate::integrity::{self, Digest};
use crate::paths::{PathResolver, SnapshotPaths};
use crate::storage::StorageAdapter;
use crate::types::{InstanceId, SnapshotId};
use crate::{KvsError, Result};

/// Snapshot engine for a single store instance
///
/// # Example
/// ```rust
/// use kvs_core::{InstanceId, LocalFileStorage, SnapshotEngine, SnapshotId};
///
/// let dir = tempfile::tempdir()?;
/// let mut engine = SnapshotEngine::open(LocalFileStorage::new(), dir.path(), InstanceId(0), 3)?;
///
/// engine.flush(b"{\"step\": 1}")?;
/// engine.flush(b"{\"step\": 2}")?;
/// assert_eq!(engine.snapshot_count(), 2);
/// assert_eq!(engine.restore(SnapshotId(2))?, b"{\"step\": 1}");
/// # Ok::<(), kvs_core::KvsError>(())
/// ```
#[derive(Debug)]
pub struct SnapshotEngine<S: StorageAdapter> {
    pub(crate) storage: S,
    pub(crate) paths: PathResolver,
    pub(crate) catalog: SnapshotCatalog,
}

impl<S: StorageAdapter> SnapshotEngine<S> {
    /// Open the engine for `instance_id` inside `dir`
    ///
    /// A flush cut short by a crash is finished or undone first. Leftover
    /// temporaries and snapshot hash files without data are then removed,
    /// the catalog is rebuilt from the remaining snapshot files and snapshots
    /// beyond `max_count` are evicted.
    ///
    /// # Arguments
    /// * `storage` - Storage adapter for all file access
    /// * `dir` - Directory holding the instance files
    /// * `instance_id` - Instance whose files are managed
    /// * `max_count` - Number of snapshots to retain
    pub fn open<P: AsRef<Path>>(
        storage: S,
        dir: P,
        instance_id: InstanceId,
        max_count: usize,
    ) -> Result<Self> {
        let paths = PathResolver::new(dir, instance_id);
        recover_interrupted_flush(&storage, &paths)?;
        remove_leftovers(&storage, &paths)?;
        let mut catalog = SnapshotCatalog::scan(&storage, &paths, max_count)?;
        if let Err(e) = catalog.rotate(&storage, &paths) {
            warn!(
                instance = %instance_id,
                error = %e,
                "snapshot eviction deferred to next flush"
            );
        }
        debug!(
            instance = %instance_id,
            dir = %paths.dir().display(),
            max_count,
            snapshot_count = catalog.current_count(),
            "opened snapshot engine"
        );
        Ok(Self {
            storage,
            paths,
            catalog,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn catalog(&self) -> &SnapshotCatalog {
        &self.catalog
    }

    pub fn snapshot_count(&self) -> usize {
        self.catalog.current_count()
    }

    pub fn max_count(&self) -> usize {
        self.catalog.max_count()
    }

    /// Restorable snapshots, oldest first.
    pub fn list(&self) -> Vec<SnapshotEntry> {
        self.catalog.list(&self.paths)
    }

    /// Load and verify the current state
    ///
    /// # Returns
    /// The current state bytes, `None` if the instance was never flushed
    pub fn load_current(&self) -> Result<Option<Vec<u8>>> {
        let current = self.paths.current();
        if !self.storage.exists(&current.data) && !self.storage.exists(&current.hash) {
            return Ok(None);
        }
        let (data, _) = self.read_verified(&current)?;
        Ok(Some(data))
    }

    /// Read a data file together with its hash file and check one against the other
    ///
    /// # Errors
    /// * `KvsError::NotFound` - data or hash file absent
    /// * `KvsError::MalformedHash` - hash file unreadable or not a digest
    /// * `KvsError::Corruption` - data does not match the digest
    pub(crate) fn read_verified(&self, files: &SnapshotPaths) -> Result<(Vec<u8>, Digest)> {
        let data = self.storage.load(&files.data)?;
        let raw = match self.storage.load(&files.hash) {
            Ok(raw) => raw,
            Err(KvsError::NotFound(path)) => return Err(KvsError::NotFound(path)),
            Err(_) => {
                return Err(KvsError::MalformedHash {
                    path: files.hash.clone(),
                })
            }
        };
        let digest = Digest::parse(&raw, &files.hash)?;
        integrity::ensure_valid(&data, &digest, &files.data)?;
        Ok((data, digest))
    }

    pub(crate) fn resolve(&self, snapshot_id: SnapshotId) -> SnapshotPaths {
        self.paths.resolve(snapshot_id)
    }
}

/// Bring the current pair back to a committed state after a crash
///
/// A flush moves the current pair into its snapshot slot and then commits the
/// new pair. Depending on where it stopped:
///
/// * current data present, current hash moved: the hash is moved back
/// * current pair moved or only its hash committed: the staged current data
///   is renamed into place if it survived, otherwise the newest snapshot is
///   moved back to the current slot
/// * current hash committed over a still-present current data (snapshots
///   disabled): the staged current data is renamed into place if it survived
///
/// Anything else is left alone for [`SnapshotEngine::load_current`] to report.
fn recover_interrupted_flush<S: StorageAdapter>(storage: &S, paths: &PathResolver) -> Result<()> {
    let current = paths.current();
    let names = storage.list(paths.dir())?;
    let newest = names
        .iter()
        .filter_map(|name| paths.parse_data_file_name(name))
        .filter(|id| !id.is_current())
        .max();

    match (storage.exists(&current.data), storage.exists(&current.hash)) {
        (true, true) => {
            if !names.iter().any(|name| is_staged_current(paths, name)) {
                return Ok(());
            }
            let data = storage.load(&current.data)?;
            let consistent = committed_digest(storage, &current.hash)
                .is_some_and(|digest| integrity::verify(&data, &digest));
            if !consistent {
                finish_from_staged(storage, paths, &names)?;
            }
        }
        (true, false) => {
            let Some(id) = newest_hash_only(storage, paths, &names) else {
                return Ok(());
            };
            let files = paths.resolve(id);
            let data = storage.load(&current.data)?;
            let stranded = committed_digest(storage, &files.hash)
                .is_some_and(|digest| integrity::verify(&data, &digest));
            if stranded {
                warn!(
                    instance = %paths.instance_id(),
                    snapshot_id = %id,
                    "interrupted flush left the current hash in a snapshot slot; moving it back"
                );
                storage.rename(&files.hash, &current.hash)?;
            }
        }
        (false, true) => {
            if finish_from_staged(storage, paths, &names)? {
                return Ok(());
            }
            if let Some(id) = newest {
                move_back(storage, paths, id)?;
            }
        }
        (false, false) => {
            if let Some(id) = newest {
                move_back(storage, paths, id)?;
            }
        }
    }
    Ok(())
}

/// Rename a staged current data file matching the committed current hash into place.
fn finish_from_staged<S: StorageAdapter>(
    storage: &S,
    paths: &PathResolver,
    names: &[String],
) -> Result<bool> {
    let current = paths.current();
    let Some(expected) = committed_digest(storage, &current.hash) else {
        return Ok(false);
    };
    for name in names.iter().filter(|name| is_staged_current(paths, name)) {
        let staged = paths.dir().join(name);
        let Ok(data) = storage.load(&staged) else {
            continue;
        };
        if integrity::verify(&data, &expected) {
            warn!(
                instance = %paths.instance_id(),
                staged = %staged.display(),
                "completing interrupted flush from staged current data"
            );
            storage.rename(&staged, &current.data)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Undo the demotion of the current pair into snapshot `id`.
fn move_back<S: StorageAdapter>(storage: &S, paths: &PathResolver, id: SnapshotId) -> Result<()> {
    let current = paths.current();
    let files = paths.resolve(id);
    warn!(
        instance = %paths.instance_id(),
        snapshot_id = %id,
        "interrupted flush; moving snapshot back to the current state"
    );
    if storage.exists(&files.hash) {
        storage.rename(&files.hash, &current.hash)?;
    }
    storage.rename(&files.data, &current.data)
}

fn committed_digest<S: StorageAdapter>(storage: &S, hash_path: &Path) -> Option<Digest> {
    let raw = storage.load(hash_path).ok()?;
    Digest::parse(&raw, hash_path).ok()
}

fn newest_hash_only<S: StorageAdapter>(
    storage: &S,
    paths: &PathResolver,
    names: &[String],
) -> Option<SnapshotId> {
    names
        .iter()
        .filter_map(|name| paths.parse_hash_file_name(name))
        .filter(|id| !id.is_current() && !storage.exists(&paths.resolve(*id).data))
        .max()
}

fn is_staged_current(paths: &PathResolver, name: &str) -> bool {
    name.starts_with(&paths.staged_current_prefix()) && name.ends_with(".tmp")
}

/// Delete temporaries of interrupted flushes and orphaned snapshot hash files.
fn remove_leftovers<S: StorageAdapter>(storage: &S, paths: &PathResolver) -> Result<()> {
    let temp_prefix = paths.temp_prefix();
    for name in storage.list(paths.dir())? {
        if name.starts_with(&temp_prefix) && name.ends_with(".tmp") {
            let path = paths.dir().join(&name);
            warn!(path = %path.display(), "removing leftover temporary file");
            storage.delete(&path)?;
            continue;
        }
        if let Some(id) = paths.parse_hash_file_name(&name) {
            if id.is_current() {
                continue;
            }
            let files = paths.resolve(id);
            if !storage.exists(&files.data) {
                warn!(path = %files.hash.display(), "removing orphaned snapshot hash file");
                storage.delete(&files.hash)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFileStorage;
    use tempfile::TempDir;

    fn open(dir: &Path, max_count: usize) -> SnapshotEngine<LocalFileStorage> {
        SnapshotEngine::open(LocalFileStorage::new(), dir, InstanceId(1), max_count).unwrap()
    }

    fn names_in(dir: &Path) -> Vec<String> {
        LocalFileStorage::new().list(dir).unwrap()
    }

    #[test]
    fn test_fresh_instance_has_no_state() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), 3);
        assert_eq!(engine.snapshot_count(), 0);
        assert_eq!(engine.max_count(), 3);
        assert!(engine.load_current().unwrap().is_none());
    }

    #[test]
    fn test_open_removes_leftovers() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::write(dir.join(".kvs_1_0.json.abc123.tmp"), b"partial").unwrap();
        std::fs::write(dir.join(".kvs_2_0.json.abc123.tmp"), b"other instance").unwrap();
        std::fs::write(dir.join("kvs_1_4.hash"), b"orphan").unwrap();

        let engine = open(dir, 3);
        assert_eq!(engine.snapshot_count(), 0);
        assert!(!dir.join(".kvs_1_0.json.abc123.tmp").exists());
        assert!(dir.join(".kvs_2_0.json.abc123.tmp").exists());
        assert!(!dir.join("kvs_1_4.hash").exists());
    }

    #[test]
    fn test_load_current_detects_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = open(temp_dir.path(), 0);
        engine.flush(b"{\"a\": 1}").unwrap();
        std::fs::write(engine.paths().current().data, b"{\"a\": 2}").unwrap();

        let err = engine.load_current().unwrap_err();
        assert!(matches!(err, KvsError::Corruption { .. }));
    }

    #[test]
    fn test_open_completes_flush_from_staged_data() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let mut engine = open(dir, 3);
        engine.flush(b"{\"v\": 1}").unwrap();
        let current = engine.paths().current();
        let second = engine.paths().resolve(SnapshotId(2));
        drop(engine);

        // Second flush stopped after committing the new current hash: the old
        // pair already sits in slot 2, the new data only in its staged file.
        std::fs::rename(&current.hash, &second.hash).unwrap();
        std::fs::rename(&current.data, &second.data).unwrap();
        std::fs::write(&current.hash, integrity::hash(b"{\"v\": 2}").as_bytes()).unwrap();
        std::fs::write(dir.join(".kvs_1_0.json.k3j9x1.tmp"), b"{\"v\": 2}").unwrap();
        std::fs::write(dir.join(".kvs_1_0.hash.k3j9x2.tmp"), b"stale").unwrap();

        let engine = open(dir, 3);
        assert_eq!(engine.load_current().unwrap().unwrap(), b"{\"v\": 2}");
        assert_eq!(engine.restore(SnapshotId(2)).unwrap(), b"{\"v\": 1}");
        assert_eq!(engine.snapshot_count(), 2);
        assert_eq!(
            names_in(dir),
            vec![
                "kvs_1_0.hash",
                "kvs_1_0.json",
                "kvs_1_1.hash",
                "kvs_1_1.json",
                "kvs_1_2.hash",
                "kvs_1_2.json",
            ]
        );
    }

    #[test]
    fn test_open_without_staged_data_moves_snapshot_back() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let mut engine = open(dir, 3);
        engine.flush(b"{\"v\": 1}").unwrap();
        let before = names_in(dir);
        let current = engine.paths().current();
        let second = engine.paths().resolve(SnapshotId(2));
        drop(engine);

        std::fs::rename(&current.hash, &second.hash).unwrap();
        std::fs::rename(&current.data, &second.data).unwrap();
        std::fs::write(&current.hash, integrity::hash(b"{\"v\": 2}").as_bytes()).unwrap();

        let engine = open(dir, 3);
        assert_eq!(engine.load_current().unwrap().unwrap(), b"{\"v\": 1}");
        assert_eq!(engine.snapshot_count(), 1);
        assert_eq!(engine.catalog().next_id(), SnapshotId(2));
        assert_eq!(names_in(dir), before);
    }

    #[test]
    fn test_open_moves_stranded_current_hash_back() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let mut engine = open(dir, 3);
        engine.flush(b"{\"v\": 1}").unwrap();
        let before = names_in(dir);
        let current = engine.paths().current();
        drop(engine);

        std::fs::rename(&current.hash, dir.join("kvs_1_2.hash")).unwrap();

        let engine = open(dir, 3);
        assert_eq!(engine.load_current().unwrap().unwrap(), b"{\"v\": 1}");
        assert_eq!(names_in(dir), before);
    }

    #[test]
    fn test_open_evicts_snapshots_beyond_lowered_bound() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let mut engine = open(dir, 4);
        for i in 0..4u8 {
            engine.flush(&[b'0' + i]).unwrap();
        }
        drop(engine);

        let engine = open(dir, 2);
        assert_eq!(engine.snapshot_count(), 2);
        assert_eq!(engine.catalog().oldest(), Some(SnapshotId(3)));
        for id in [1, 2] {
            let files = engine.paths().resolve(SnapshotId(id));
            assert!(!files.data_exists());
            assert!(!files.hash_exists());
        }
    }

    #[test]
    fn test_missing_current_hash_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = open(temp_dir.path(), 0);
        engine.flush(b"{}").unwrap();
        let hash_path = engine.paths().current().hash;
        std::fs::remove_file(&hash_path).unwrap();

        match engine.load_current() {
            Err(KvsError::NotFound(p)) => assert_eq!(p, hash_path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
