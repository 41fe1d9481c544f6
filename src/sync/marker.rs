//! The workspace marker: a one-line file in the sync root holding the id of
//! the remote workspace the directory is bound to.

use crate::error::{Result, SyncError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorkspaceMarker {
    path: PathBuf,
}

impl WorkspaceMarker {
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            path: root.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Stored id, or `None` if the marker is missing or blank.
    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(&self.path, e)),
        }
    }

    /// Replace the stored id.
    pub fn write(&self, id: &str) -> Result<()> {
        let temp_file = self.path.with_extension("tmp");
        fs::write(&temp_file, format!("{}\n", id)).map_err(|e| SyncError::io(&temp_file, e))?;

        // Atomic rename
        fs::rename(&temp_file, &self.path).map_err(|e| SyncError::io(&self.path, e))
    }
}
