//! Mapping remote relative paths onto the local sync root.

use crate::error::{Result, SyncError};
use std::path::{Component, Path, PathBuf};

/// Validate that a relative path is safe and doesn't escape the root.
/// Returns the full path if valid.
pub fn validate_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let invalid = |reason| SyncError::InvalidPath {
        path: relative.to_string(),
        reason,
    };

    if relative.is_empty() {
        return Err(invalid("empty path"));
    }

    let rel_path = Path::new(relative);
    if rel_path.is_absolute() {
        return Err(invalid("absolute paths are not allowed"));
    }

    for component in rel_path.components() {
        match component {
            Component::ParentDir => return Err(invalid("path traversal is not allowed")),
            Component::Prefix(_) | Component::RootDir => {
                return Err(invalid("prefixed paths are not allowed"))
            }
            _ => {}
        }
    }

    let full = root.join(rel_path);
    if !normalize_path(&full).starts_with(normalize_path(root)) {
        return Err(invalid("path escapes the sync root"));
    }

    Ok(full)
}

/// Normalize a path without requiring it to exist (unlike canonicalize)
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            c => normalized.push(c),
        }
    }
    normalized
}

/// Name a local file is uploaded under: its final path component.
pub fn remote_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| SyncError::InvalidPath {
            path: path.display().to_string(),
            reason: "no file name",
        })
}

/// Local relative path for a generated-code URI such as
/// `/api/v0.1/workspace/1234/src-gen:psex:c:pshdl_generic_sim.h`.
///
/// The last URI segment encodes directories with `:`. With `base_only`
/// everything but the file name is dropped.
pub fn rel_path_from_uri(uri: &str, base_only: bool) -> String {
    let last = uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri);
    let rel = last.replace(':', "/");
    if base_only {
        return rel.rsplit('/').next().unwrap_or(&rel).to_string();
    }
    rel
}

/// Whether `path` ends with the watched source suffix (e.g. `.pshdl`).
pub fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.to_str().is_some_and(|p| p.ends_with(suffix))
}
