//! Configuration structures for VellumDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the data file.
    pub db_path: PathBuf,
    /// Path to the write-ahead log file.
    pub wal_path: PathBuf,
    /// Number of frames in the buffer pool.
    pub pool_frames: usize,
    /// Enable fsync on WAL commit and pool flush.
    pub fsync_enabled: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./vellum.db"),
            wal_path: PathBuf::from("./vellum.wal"),
            pool_frames: 64,
            fsync_enabled: true,
        }
    }
}

impl DbConfig {
    /// Builds a config with data and WAL files rooted in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            db_path: dir.join("vellum.db"),
            wal_path: dir.join("vellum.wal"),
            ..Default::default()
        }
    }
}
