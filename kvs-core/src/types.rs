/*!
Identifier newtypes shared by every component.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one store instance inside a storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

/// Identifies a snapshot of an instance. Id `0` is the live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl InstanceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl SnapshotId {
    /// The current (live) state.
    pub const CURRENT: SnapshotId = SnapshotId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_current(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SnapshotId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for InstanceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
