/*!
Store facade: typed get/set over the live map plus the snapshot API.
*/

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::catalog::SnapshotEntry;
use crate::config::KvsConfig;
use crate::engine::SnapshotEngine;
use crate::integrity::Digest;
use crate::observability;
use crate::paths::{PathResolver, SnapshotPaths};
use crate::storage::{LocalFileStorage, StorageAdapter};
use crate::types::{InstanceId, SnapshotId};
use crate::value::{decode_map, encode_map, KvsMap, KvsValue};
use crate::{KvsError, Result};

/// A key-value store instance
///
/// The live map and the snapshot engine sit behind separate locks. Operations
/// that need both always take the engine lock first.
///
/// # Example
/// ```rust
/// use kvs_core::{Kvs, KvsConfig, SnapshotId};
///
/// let dir = tempfile::tempdir()?;
/// let kvs = Kvs::open(KvsConfig::new(0u64, dir.path()).with_flush_on_exit(false))?;
///
/// kvs.set_value("counter", 1i32)?;
/// kvs.flush()?;
/// kvs.set_value("counter", 2i32)?;
/// kvs.flush()?;
///
/// // Snapshot 2 holds what the second flush replaced.
/// kvs.snapshot_restore(SnapshotId(2))?;
/// assert_eq!(kvs.get_value_as::<i32>("counter")?, 1);
/// # Ok::<(), kvs_core::KvsError>(())
/// ```
pub struct Kvs<S: StorageAdapter = LocalFileStorage> {
    instance_id: InstanceId,
    paths: PathResolver,
    map: Mutex<KvsMap>,
    defaults: KvsMap,
    engine: Mutex<SnapshotEngine<S>>,
    flush_on_exit: AtomicBool,
}

impl Kvs<LocalFileStorage> {
    /// Open an instance on the local filesystem
    pub fn open(config: KvsConfig) -> Result<Self> {
        Self::open_with_storage(config, LocalFileStorage::new())
    }
}

impl<S: StorageAdapter> Kvs<S> {
    /// Open an instance through the given storage adapter
    ///
    /// # Errors
    /// * `KvsError::NotFound` - defaults or current state required but absent
    /// * `KvsError::Corruption` - current state does not match its hash and
    ///   no interrupted flush explains the mismatch
    pub fn open_with_storage(config: KvsConfig, storage: S) -> Result<Self> {
        config.validate()?;
        let engine = SnapshotEngine::open(
            storage,
            &config.dir,
            config.instance_id,
            config.snapshot_max_count,
        )?;
        let paths = engine.paths().clone();

        let defaults = match engine.storage().load(&paths.defaults()) {
            Ok(bytes) => decode_map(&bytes)?,
            Err(KvsError::NotFound(path)) if config.need_defaults => {
                return Err(KvsError::NotFound(path))
            }
            Err(KvsError::NotFound(_)) => KvsMap::new(),
            Err(e) => return Err(e),
        };

        let map = match engine.load_current()? {
            Some(bytes) => decode_map(&bytes)?,
            None if config.need_kvs => return Err(KvsError::NotFound(paths.current().data)),
            None => KvsMap::new(),
        };

        info!(
            instance = %config.instance_id,
            max_count = config.snapshot_max_count,
            "opened KVS"
        );
        debug!(
            keys = map.len(),
            defaults = defaults.len(),
            snapshot_count = engine.snapshot_count(),
            "loaded KVS state"
        );

        Ok(Self {
            instance_id: config.instance_id,
            paths,
            map: Mutex::new(map),
            defaults,
            engine: Mutex::new(engine),
            flush_on_exit: AtomicBool::new(config.flush_on_exit),
        })
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Enable or disable the implicit flush on drop.
    pub fn set_flush_on_exit(&self, flush_on_exit: bool) {
        self.flush_on_exit.store(flush_on_exit, Ordering::SeqCst);
    }

    pub fn flush_on_exit(&self) -> bool {
        self.flush_on_exit.load(Ordering::SeqCst)
    }

    /// Assign a value to a key
    pub fn set_value<K: Into<String>, V: Into<KvsValue>>(&self, key: K, value: V) -> Result<()> {
        self.map.lock()?.insert(key.into(), value.into());
        Ok(())
    }

    /// Value for `key`, falling back to its default
    pub fn get_value(&self, key: &str) -> Result<KvsValue> {
        if let Some(value) = self.map.lock()?.get(key) {
            return Ok(value.clone());
        }
        self.get_default_value(key)
    }

    /// Value for `key` converted to `T`
    ///
    /// # Errors
    /// * `KvsError::KeyNotFound` - neither set nor defaulted
    /// * `KvsError::ConversionFailed` - stored under a different type
    pub fn get_value_as<T>(&self, key: &str) -> Result<T>
    where
        T: TryFrom<KvsValue, Error = KvsError>,
    {
        T::try_from(self.get_value(key)?)
    }

    pub fn get_default_value(&self, key: &str) -> Result<KvsValue> {
        self.defaults
            .get(key)
            .cloned()
            .ok_or_else(|| KvsError::KeyNotFound(key.to_string()))
    }

    /// True when `key` has a default and no value of its own.
    pub fn is_value_default(&self, key: &str) -> Result<bool> {
        if self.map.lock()?.contains_key(key) {
            Ok(false)
        } else if self.defaults.contains_key(key) {
            Ok(true)
        } else {
            Err(KvsError::KeyNotFound(key.to_string()))
        }
    }

    /// Drop the value of `key` so that its default applies again
    pub fn reset_key(&self, key: &str) -> Result<()> {
        if !self.defaults.contains_key(key) {
            return Err(KvsError::KeyNotFound(key.to_string()));
        }
        self.map.lock()?.remove(key);
        Ok(())
    }

    /// Remove every key from the live state
    pub fn reset(&self) -> Result<()> {
        self.map.lock()?.clear();
        Ok(())
    }

    pub fn remove_key(&self, key: &str) -> Result<()> {
        match self.map.lock()?.remove(key) {
            Some(_) => Ok(()),
            None => Err(KvsError::KeyNotFound(key.to_string())),
        }
    }

    /// Keys of the live state in ascending order
    pub fn get_all_keys(&self) -> Result<Vec<String>> {
        Ok(self.map.lock()?.keys().cloned().collect())
    }

    pub fn key_exists(&self, key: &str) -> Result<bool> {
        Ok(self.map.lock()?.contains_key(key))
    }

    /// Persist the live state and rotate snapshots
    pub fn flush(&self) -> Result<()> {
        let start = Instant::now();
        let mut engine = self.engine.lock()?;
        let bytes = encode_map(&*self.map.lock()?)?;

        match engine.flush(&bytes) {
            Ok(outcome) => {
                observability::record_flush(
                    true,
                    outcome.bytes,
                    outcome.evicted.len(),
                    start.elapsed(),
                );
                info!(snapshot_count = engine.snapshot_count(), "flushed KVS");
                Ok(())
            }
            Err(e) => {
                observability::record_flush(false, bytes.len(), 0, start.elapsed());
                Err(e)
            }
        }
    }

    /// Number of retained snapshots
    pub fn snapshot_count(&self) -> Result<usize> {
        Ok(self.engine.lock()?.snapshot_count())
    }

    /// Configured retention bound
    pub fn snapshot_max_count(&self) -> Result<usize> {
        Ok(self.engine.lock()?.max_count())
    }

    /// Replace the live state with the content of a retained snapshot
    ///
    /// On error the live state is left untouched.
    ///
    /// # Errors
    /// * `KvsError::InvalidSnapshotId` - id 0 or not retained
    /// * `KvsError::Corruption` - snapshot failed its integrity check
    pub fn snapshot_restore(&self, snapshot_id: SnapshotId) -> Result<()> {
        let engine = self.engine.lock()?;
        let result = self.restore_locked(&engine, snapshot_id);
        observability::record_restore(result.is_ok());
        info!(snapshot_id = %snapshot_id, result = ?result, "snapshot restore");
        result
    }

    fn restore_locked(&self, engine: &SnapshotEngine<S>, snapshot_id: SnapshotId) -> Result<()> {
        let bytes = engine.restore(snapshot_id)?;
        let restored = decode_map(&bytes)?;
        *self.map.lock()? = restored;
        Ok(())
    }

    /// Check a snapshot's integrity without touching the live state
    pub fn snapshot_verify(&self, snapshot_id: SnapshotId) -> Result<Digest> {
        self.engine.lock()?.verify(snapshot_id)
    }

    /// Restorable snapshots, oldest first
    pub fn snapshot_list(&self) -> Result<Vec<SnapshotEntry>> {
        Ok(self.engine.lock()?.list())
    }

    /// Paths of a snapshot's files; never fails, the files need not exist
    pub fn snapshot_paths(&self, snapshot_id: SnapshotId) -> SnapshotPaths {
        let paths = self.paths.resolve(snapshot_id);
        info!(
            kvs_path = %paths.data.display(),
            kvs_path_exists = paths.data_exists(),
            hash_path = %paths.hash.display(),
            hash_path_exists = paths.hash_exists(),
            "snapshot paths"
        );
        paths
    }

    pub fn get_kvs_filename(&self, snapshot_id: SnapshotId) -> PathBuf {
        self.paths.resolve(snapshot_id).data
    }

    pub fn get_hash_filename(&self, snapshot_id: SnapshotId) -> PathBuf {
        self.paths.resolve(snapshot_id).hash
    }
}

impl<S: StorageAdapter> Drop for Kvs<S> {
    fn drop(&mut self) {
        if !self.flush_on_exit() {
            return;
        }
        if let Err(e) = self.flush() {
            error!(instance = %self.instance_id, error = %e, "flush on exit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &std::path::Path) -> KvsConfig {
        KvsConfig::new(0u64, dir).with_flush_on_exit(false)
    }

    fn write_defaults(dir: &std::path::Path, instance: u64, json: &str) {
        std::fs::write(dir.join(format!("kvs_{instance}_default.json")), json).unwrap();
    }

    #[test]
    fn test_set_get_remove() {
        let temp_dir = TempDir::new().unwrap();
        let kvs = Kvs::open(config(temp_dir.path())).unwrap();

        kvs.set_value("number", 123.0).unwrap();
        kvs.set_value("name", "kvs").unwrap();
        assert_eq!(kvs.get_value("number").unwrap(), KvsValue::F64(123.0));
        assert_eq!(kvs.get_value_as::<String>("name").unwrap(), "kvs");
        assert_eq!(kvs.get_all_keys().unwrap(), vec!["name", "number"]);

        kvs.remove_key("name").unwrap();
        assert!(!kvs.key_exists("name").unwrap());
        assert!(matches!(kvs.remove_key("name"), Err(KvsError::KeyNotFound(_))));
        assert!(matches!(kvs.get_value("name"), Err(KvsError::KeyNotFound(_))));
        assert!(matches!(
            kvs.get_value_as::<bool>("number"),
            Err(KvsError::ConversionFailed(_))
        ));
    }

    #[test]
    fn test_defaults_fallback_and_reset() {
        let temp_dir = TempDir::new().unwrap();
        write_defaults(
            temp_dir.path(),
            0,
            r#"{"level": {"t": "i32", "v": 5}}"#,
        );
        let kvs = Kvs::open(config(temp_dir.path())).unwrap();

        assert_eq!(kvs.get_value_as::<i32>("level").unwrap(), 5);
        assert!(kvs.is_value_default("level").unwrap());
        assert!(!kvs.key_exists("level").unwrap());

        kvs.set_value("level", 9i32).unwrap();
        assert!(!kvs.is_value_default("level").unwrap());
        assert_eq!(kvs.get_default_value("level").unwrap(), KvsValue::I32(5));

        kvs.reset_key("level").unwrap();
        assert_eq!(kvs.get_value_as::<i32>("level").unwrap(), 5);
        assert!(matches!(kvs.reset_key("other"), Err(KvsError::KeyNotFound(_))));
        assert!(matches!(kvs.is_value_default("other"), Err(KvsError::KeyNotFound(_))));

        kvs.set_value("a", true).unwrap();
        kvs.reset().unwrap();
        assert!(kvs.get_all_keys().unwrap().is_empty());
    }

    #[test]
    fn test_need_flags() {
        let temp_dir = TempDir::new().unwrap();
        let result = Kvs::open(config(temp_dir.path()).with_need_defaults(true));
        assert!(matches!(result, Err(KvsError::NotFound(_))));

        let result = Kvs::open(config(temp_dir.path()).with_need_kvs(true));
        assert!(matches!(result, Err(KvsError::NotFound(_))));

        let kvs = Kvs::open(config(temp_dir.path())).unwrap();
        kvs.flush().unwrap();
        drop(kvs);
        assert!(Kvs::open(config(temp_dir.path()).with_need_kvs(true)).is_ok());
    }

    #[test]
    fn test_restore_replaces_whole_state() {
        let temp_dir = TempDir::new().unwrap();
        let kvs = Kvs::open(config(temp_dir.path())).unwrap();

        kvs.set_value("a", 1i32).unwrap();
        kvs.flush().unwrap();
        kvs.set_value("b", 2i32).unwrap();
        kvs.flush().unwrap();

        kvs.snapshot_restore(SnapshotId(2)).unwrap();
        assert_eq!(kvs.get_all_keys().unwrap(), vec!["a"]);
        kvs.snapshot_restore(SnapshotId(1)).unwrap();
        assert!(kvs.get_all_keys().unwrap().is_empty());
        assert_eq!(kvs.snapshot_count().unwrap(), 2);
    }

    #[test]
    fn test_failed_restore_keeps_live_state() {
        let temp_dir = TempDir::new().unwrap();
        let kvs = Kvs::open(config(temp_dir.path())).unwrap();
        kvs.set_value("a", 1i32).unwrap();
        kvs.flush().unwrap();
        kvs.set_value("live", true).unwrap();

        std::fs::write(kvs.get_kvs_filename(SnapshotId(1)), b"{\"a\": null}").unwrap();
        assert!(kvs.snapshot_restore(SnapshotId(1)).unwrap_err().is_corruption());
        assert!(matches!(
            kvs.snapshot_restore(SnapshotId(0)),
            Err(KvsError::InvalidSnapshotId)
        ));
        assert_eq!(kvs.get_all_keys().unwrap(), vec!["a", "live"]);
    }

    #[test]
    fn test_drop_flushes_when_enabled() {
        let temp_dir = TempDir::new().unwrap();
        {
            let kvs = Kvs::open(config(temp_dir.path()).with_flush_on_exit(true)).unwrap();
            kvs.set_value("kept", 1u32).unwrap();
        }
        {
            let kvs = Kvs::open(config(temp_dir.path())).unwrap();
            assert_eq!(kvs.get_value_as::<u32>("kept").unwrap(), 1);
            kvs.set_value("lost", 2u32).unwrap();
        }
        let kvs = Kvs::open(config(temp_dir.path())).unwrap();
        assert!(!kvs.key_exists("lost").unwrap());
        assert_eq!(kvs.snapshot_count().unwrap(), 1);
    }

    #[test]
    fn test_set_flush_on_exit_toggles_drop_flush() {
        let temp_dir = TempDir::new().unwrap();
        {
            let kvs = Kvs::open(config(temp_dir.path())).unwrap();
            assert!(!kvs.flush_on_exit());
            kvs.set_flush_on_exit(true);
            kvs.set_value("x", KvsValue::Null).unwrap();
        }
        let kvs = Kvs::open(config(temp_dir.path())).unwrap();
        assert_eq!(kvs.get_value("x").unwrap(), KvsValue::Null);
    }

    #[test]
    fn test_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let kvs = Kvs::open(KvsConfig::new(7u64, temp_dir.path()).with_flush_on_exit(false))
            .unwrap();
        assert_eq!(
            kvs.get_kvs_filename(SnapshotId(2)),
            temp_dir.path().join("kvs_7_2.json")
        );
        assert_eq!(
            kvs.get_hash_filename(SnapshotId(0)),
            temp_dir.path().join("kvs_7_0.hash")
        );
        let paths = kvs.snapshot_paths(SnapshotId(1));
        assert!(!paths.data_exists());
        assert_eq!(kvs.snapshot_max_count().unwrap(), 3);
    }
}
