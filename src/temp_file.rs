//! Temporary download files that clean up after themselves.

use std::path::{Path, PathBuf};

/// Removes the file at `path` when dropped, unless [`defuse`](Self::defuse)d.
///
/// Download units write into a temporary sibling of the target and rename it
/// into place once the transfer is verified. If the unit fails or is
/// cancelled mid-write the guard deletes the partial file.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file.
    pub fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Temporary sibling used while `target` is being written.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.hdlsync.tmp", name))
}
