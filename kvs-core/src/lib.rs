/*!
# KVS Core

Persistency and snapshot engine of an embedded key-value store.

A store instance keeps its live state in memory and flushes it to a directory
as a JSON file paired with a SHA-256 hash file. Every flush first turns the
state it replaces into a numbered snapshot; the oldest snapshots are evicted
once more than the configured number are retained. Any retained snapshot can be
restored after its integrity has been checked.

## Architecture

- [`integrity`] hashes and verifies file contents
- [`paths`] derives the file names of an instance
- [`catalog`] tracks retained snapshot ids and rotates them
- [`writer`] and [`restore`] implement flush and restore on [`SnapshotEngine`]
- [`storage`] is the filesystem port, with staged writes and atomic commits
- [`Kvs`] is the typed store built on top of the engine

## On-disk layout

```text
kvs_<instance>_0.json / .hash     current state
kvs_<instance>_<n>.json / .hash   snapshot n, n >= 1
kvs_<instance>_default.json       optional default values
```

## Usage

```rust
use kvs_core::{Kvs, KvsConfig, SnapshotId};

let dir = tempfile::tempdir()?;
let config = KvsConfig::new(1u64, dir.path())
    .with_snapshot_max_count(2)
    .with_flush_on_exit(false);
let kvs = Kvs::open(config)?;

for round in 0..3i32 {
    kvs.set_value("round", round)?;
    kvs.flush()?;
}
assert_eq!(kvs.snapshot_count()?, 2);

// Snapshot 1 was evicted; snapshot 3 holds the state the last flush replaced.
kvs.snapshot_restore(SnapshotId(3))?;
assert_eq!(kvs.get_value_as::<i32>("round")?, 1);
kvs.snapshot_restore(SnapshotId(2))?;
assert_eq!(kvs.get_value_as::<i32>("round")?, 0);
# Ok::<(), kvs_core::KvsError>(())
```
*/

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod kvs;
pub mod observability;
pub mod paths;
pub mod restore;
pub mod storage;
pub mod types;
pub mod value;
pub mod writer;


pub use catalog::{SnapshotCatalog, SnapshotEntry};
pub use config::{KvsConfig, DEFAULT_SNAPSHOT_MAX_COUNT};
pub use engine::SnapshotEngine;
pub use error::{KvsError, Result};
pub use integrity::Digest;
pub use kvs::Kvs;
pub use observability::{init_default_observability, init_observability};
pub use paths::{PathResolver, SnapshotPaths};
pub use storage::{LocalFileStorage, StorageAdapter};
pub use types::{InstanceId, SnapshotId};
pub use value::{KvsMap, KvsValue};
pub use writer::FlushOutcome;

#[cfg(feature = "metrics")]
pub use observability::KvsMetrics;
