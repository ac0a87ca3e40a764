/*!
Persistence writer: crash-safe flush with snapshot rotation.

A flush first stages every new file under a temporary name. It then demotes the
committed current pair into the snapshot slot the flush allocates and commits
the new current pair:

1. current hash moved to the snapshot hash
2. current data moved to the snapshot data
3. new current hash committed
4. new current data committed

Before the first flush there is no current pair to demote; the empty state is
committed into the snapshot slot instead. With snapshots disabled only steps 3
and 4 run. Step 4 is the commit point: a failure before it undoes the earlier
steps, and a crash before it is finished or undone when the engine is next
opened.
*/

use std::path::PathBuf;
use tracing::{debug, warn};

use crate::engine::SnapshotEngine;
use crate::integrity;
use crate::storage::{StagedFile, StorageAdapter};
use crate::types::SnapshotId;
use crate::value::{encode_map, KvsMap};
use crate::{KvsError, Result};

/// What a successful flush did on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Snapshot written by this flush; `None` when snapshots are disabled
    pub snapshot_id: Option<SnapshotId>,
    /// Snapshots evicted by the rotation that followed the commit
    pub evicted: Vec<SnapshotId>,
    /// Size of the serialized state
    pub bytes: usize,
}

enum Step {
    Move { from: PathBuf, to: PathBuf },
    Commit(StagedFile),
}

enum Undo {
    Move { from: PathBuf, to: PathBuf },
    Delete(PathBuf),
    Rewrite { path: PathBuf, content: Vec<u8> },
}

impl<S: StorageAdapter> SnapshotEngine<S> {
    /// Persist `data` as the new current state
    ///
    /// With a non-zero retention bound the state committed before this flush
    /// becomes a new snapshot and the oldest snapshots beyond the bound are
    /// evicted.
    ///
    /// # Arguments
    /// * `data` - Serialized store content
    ///
    /// # Returns
    /// The flush outcome, or an error. On error the previous current state and
    /// snapshots are left as they were and the catalog is unchanged.
    pub fn flush(&mut self, data: &[u8]) -> Result<FlushOutcome> {
        let digest = integrity::hash(data);
        let current = self.paths.current();
        let snapshot_id = (self.catalog.max_count() > 0).then(|| self.catalog.next_id());

        let mut steps: Vec<(Step, Undo)> = Vec::with_capacity(4);
        if let Some(id) = snapshot_id {
            let files = self.paths.resolve(id);
            if self.storage.exists(&current.data) {
                steps.push((
                    Step::Move {
                        from: current.hash.clone(),
                        to: files.hash.clone(),
                    },
                    Undo::Move {
                        from: files.hash,
                        to: current.hash.clone(),
                    },
                ));
                steps.push((
                    Step::Move {
                        from: current.data.clone(),
                        to: files.data.clone(),
                    },
                    Undo::Move {
                        from: files.data,
                        to: current.data.clone(),
                    },
                ));
            } else {
                let empty = encode_map(&KvsMap::new())?;
                let empty_digest = integrity::hash(&empty);
                steps.push((
                    Step::Commit(self.storage.stage(empty_digest.as_bytes(), &files.hash)?),
                    Undo::Delete(files.hash),
                ));
                steps.push((
                    Step::Commit(self.storage.stage(&empty, &files.data)?),
                    Undo::Delete(files.data),
                ));
            }
        }

        let restore_hash = match snapshot_id {
            Some(_) => Undo::Delete(current.hash.clone()),
            None => match self.storage.load(&current.hash) {
                Ok(content) => Undo::Rewrite {
                    path: current.hash.clone(),
                    content,
                },
                Err(KvsError::NotFound(_)) => Undo::Delete(current.hash.clone()),
                Err(e) => return Err(e),
            },
        };
        steps.push((
            Step::Commit(self.storage.stage(digest.as_bytes(), &current.hash)?),
            restore_hash,
        ));
        let commit_point = self.storage.stage(data, &current.data)?;

        let mut done: Vec<Undo> = Vec::with_capacity(steps.len());
        for (step, undo) in steps {
            if let Err(e) = self.apply(step) {
                self.roll_back(done);
                return Err(e);
            }
            done.push(undo);
        }
        if let Err(e) = self.apply(Step::Commit(commit_point)) {
            self.roll_back(done);
            return Err(e);
        }

        if let Some(id) = snapshot_id {
            self.catalog.record(id);
        }
        let evicted = match self.catalog.rotate(&self.storage, &self.paths) {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(
                    instance = %self.paths.instance_id(),
                    error = %e,
                    "snapshot eviction deferred to next flush"
                );
                Vec::new()
            }
        };

        debug!(
            instance = %self.paths.instance_id(),
            snapshot_id = ?snapshot_id,
            evicted = ?evicted,
            bytes = data.len(),
            "flushed store"
        );
        Ok(FlushOutcome {
            snapshot_id,
            evicted,
            bytes: data.len(),
        })
    }

    fn apply(&self, step: Step) -> Result<()> {
        let (target, result) = match step {
            Step::Move { from, to } => {
                let result = self.storage.rename(&from, &to);
                (to, result)
            }
            Step::Commit(file) => {
                let target = file.target().to_path_buf();
                (target, self.storage.commit(file))
            }
        };
        if let Err(e) = &result {
            warn!(
                target = %target.display(),
                error = %e,
                "flush step failed; rolling back"
            );
        }
        result
    }

    /// Undo the steps of a failed flush, newest first.
    fn roll_back(&self, done: Vec<Undo>) {
        for undo in done.into_iter().rev() {
            let (path, result) = match undo {
                Undo::Move { from, to } => {
                    let result = self.storage.rename(&from, &to);
                    (to, result)
                }
                Undo::Delete(path) => {
                    let result = self.storage.delete(&path);
                    (path, result)
                }
                Undo::Rewrite { path, content } => {
                    let result = self.storage.write_atomic(&content, &path);
                    (path, result)
                }
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "rollback step failed");
            }
        }
    }
}
