//! Single-file transfers and concurrent batches of them.

pub mod batch;
pub mod unit;

pub use crate::config::FailurePolicy;
pub use batch::BatchTransfer;

use crate::api::Record;
use crate::error::Result;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// One file to move between the sync root and the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTask {
    pub direction: Direction,
    /// File URI for downloads, remote file name for uploads.
    pub remote: String,
    /// Path relative to the sync root.
    pub local: PathBuf,
    /// Milliseconds since the epoch, stamped on downloaded files.
    pub modified: Option<i64>,
}

impl TransferTask {
    pub fn download(record: &Record) -> Self {
        Self {
            direction: Direction::Download,
            remote: record.file_uri.clone(),
            local: PathBuf::from(&record.rel_path),
            modified: (record.last_modified > 0).then_some(record.last_modified),
        }
    }

    pub fn upload(local: impl Into<PathBuf>, remote_name: impl Into<String>) -> Self {
        Self {
            direction: Direction::Upload,
            remote: remote_name.into(),
            local: local.into(),
            modified: None,
        }
    }
}

/// Result of running one [`TransferTask`]: bytes moved, or why it failed.
#[derive(Debug)]
pub struct TransferOutcome {
    pub task: TransferTask,
    pub result: Result<u64>,
}

/// Summary of a successful batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub files: usize,
    pub bytes: u64,
    /// Progress notices logged while waiting.
    pub heartbeats: u32,
    pub elapsed: Duration,
}
