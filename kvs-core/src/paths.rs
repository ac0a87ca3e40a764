/*!
Canonical on-disk paths for an instance.

```text
<dir>/kvs_<instance>_0.json      current state
<dir>/kvs_<instance>_0.hash
<dir>/kvs_<instance>_<n>.json    snapshot n (n >= 1)
<dir>/kvs_<instance>_<n>.hash
<dir>/kvs_<instance>_default.json
```
*/

use std::path::{Path, PathBuf};

use crate::types::{InstanceId, SnapshotId};

/// Data and hash file of one snapshot slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub data: PathBuf,
    pub hash: PathBuf,
}

impl SnapshotPaths {
    pub fn data_exists(&self) -> bool {
        exists(&self.data)
    }

    pub fn hash_exists(&self) -> bool {
        exists(&self.hash)
    }
}

/// Derives file names for one instance inside its directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    dir: PathBuf,
    instance_id: InstanceId,
}

impl PathResolver {
    pub fn new<P: AsRef<Path>>(dir: P, instance_id: InstanceId) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            instance_id,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// File name prefix shared by every file of this instance.
    pub fn prefix(&self) -> String {
        format!("kvs_{}_", self.instance_id)
    }

    /// Resolve the data and hash paths of a snapshot
    ///
    /// Pure: the files need not exist.
    pub fn resolve(&self, snapshot_id: SnapshotId) -> SnapshotPaths {
        let stem = format!("{}{}", self.prefix(), snapshot_id);
        SnapshotPaths {
            data: self.dir.join(format!("{stem}.json")),
            hash: self.dir.join(format!("{stem}.hash")),
        }
    }

    pub fn current(&self) -> SnapshotPaths {
        self.resolve(SnapshotId::CURRENT)
    }

    pub fn defaults(&self) -> PathBuf {
        self.dir.join(format!("{}default.json", self.prefix()))
    }

    /// Recover the snapshot id from a data file name of this instance.
    ///
    /// `kvs_<instance>_<n>.json` yields `Some(n)`, anything else `None`.
    pub fn parse_data_file_name(&self, name: &str) -> Option<SnapshotId> {
        self.parse_with_extension(name, ".json")
    }

    pub fn parse_hash_file_name(&self, name: &str) -> Option<SnapshotId> {
        self.parse_with_extension(name, ".hash")
    }

    fn parse_with_extension(&self, name: &str, extension: &str) -> Option<SnapshotId> {
        let digits = name
            .strip_prefix(&self.prefix())?
            .strip_suffix(extension)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(SnapshotId)
    }

    /// Prefix of the staged temporary files of this instance.
    pub fn temp_prefix(&self) -> String {
        format!(".{}", self.prefix())
    }

    /// Prefix of a staged file destined for the current data file.
    pub fn staged_current_prefix(&self) -> String {
        format!(".{}{}.json.", self.prefix(), SnapshotId::CURRENT)
    }
}

/// Non-failing existence check; a missing directory reports `false`.
pub fn exists(path: &Path) -> bool {
    path.exists()
}
