//! Configuration for a store instance
//!
//! This module provides the configuration structure consumed by [`crate::Kvs::open`]
//! together with its defaults and validation. Configurations can be built in code
//! or parsed from the JSON parameter objects used by the test harness.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::InstanceId;
use crate::{KvsError, Result};

/// Default number of retained snapshots per instance.
pub const DEFAULT_SNAPSHOT_MAX_COUNT: usize = 3;

fn default_snapshot_max_count() -> usize {
    DEFAULT_SNAPSHOT_MAX_COUNT
}

fn default_flush_on_exit() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Configuration structure for a single store instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvsConfig {
    /// Instance identifier, part of every file name
    pub instance_id: InstanceId,
    /// Directory holding the current state, snapshots and defaults
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Number of snapshots retained before the oldest is evicted (0 disables snapshots)
    #[serde(default = "default_snapshot_max_count")]
    pub snapshot_max_count: usize,
    /// Flush implicitly when the instance is dropped
    #[serde(default = "default_flush_on_exit")]
    pub flush_on_exit: bool,
    /// Fail to open when the defaults file is missing
    #[serde(default)]
    pub need_defaults: bool,
    /// Fail to open when the current-state file is missing
    #[serde(default)]
    pub need_kvs: bool,
}

/// Harness input wraps the parameters under `kvs_parameters`.
#[derive(Deserialize)]
struct Wrapped {
    kvs_parameters: KvsConfig,
}

impl KvsConfig {
    /// Create a configuration with default retention and exit-flush behaviour
    pub fn new<P: AsRef<Path>>(instance_id: impl Into<InstanceId>, dir: P) -> Self {
        Self {
            instance_id: instance_id.into(),
            dir: dir.as_ref().to_path_buf(),
            snapshot_max_count: DEFAULT_SNAPSHOT_MAX_COUNT,
            flush_on_exit: true,
            need_defaults: false,
            need_kvs: false,
        }
    }

    pub fn with_snapshot_max_count(mut self, count: usize) -> Self {
        self.snapshot_max_count = count;
        self
    }

    pub fn with_flush_on_exit(mut self, flush_on_exit: bool) -> Self {
        self.flush_on_exit = flush_on_exit;
        self
    }

    pub fn with_need_defaults(mut self, need_defaults: bool) -> Self {
        self.need_defaults = need_defaults;
        self
    }

    pub fn with_need_kvs(mut self, need_kvs: bool) -> Self {
        self.need_kvs = need_kvs;
        self
    }

    /// Parse a configuration from JSON
    ///
    /// Accepts either the bare parameter object or one wrapped in
    /// `{"kvs_parameters": {...}}`. Missing optional fields take their defaults.
    ///
    /// # Example
    /// ```rust
    /// use kvs_core::KvsConfig;
    ///
    /// let config = KvsConfig::from_json_str(
    ///     r#"{"kvs_parameters": {"instance_id": 1, "dir": "/tmp/kvs", "snapshot_max_count": 0}}"#,
    /// )?;
    /// assert_eq!(config.snapshot_max_count, 0);
    /// assert!(config.flush_on_exit);
    /// # Ok::<(), kvs_core::KvsError>(())
    /// ```
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(input)?;
        let config = if value.get("kvs_parameters").is_some() {
            serde_json::from_value::<Wrapped>(value)?.kvs_parameters
        } else {
            serde_json::from_value(value)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(KvsError::validation("dir cannot be empty"));
        }
        Ok(())
    }
}
