//! A single upload or download.

use super::{Direction, TransferTask};
use crate::api::{Download, WorkspaceApi};
use crate::error::{FailureClass, Result, SyncError};
use crate::path::validate_path;
use crate::temp_file::{temp_path_for, TempFileGuard};
use bytes::Bytes;
use filetime::FileTime;
use futures::StreamExt;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `task` against workspace `workspace_id`, with local paths resolved
/// under `root`. Returns the number of bytes moved.
///
/// When `token` is cancelled the unit stops at its next suspension point and
/// returns [`SyncError::Cancelled`]; a partially written download is removed.
pub async fn run<A>(
    api: &A,
    workspace_id: &str,
    root: &Path,
    task: &TransferTask,
    token: &CancellationToken,
) -> Result<u64>
where
    A: WorkspaceApi + ?Sized,
{
    let work = async {
        match task.direction {
            Direction::Download => download(api, workspace_id, root, task).await,
            Direction::Upload => upload(api, workspace_id, root, task).await,
        }
    };

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(SyncError::Cancelled),
        result = work => result,
    };

    result.map_err(|e| match e {
        SyncError::Cancelled => e,
        other => SyncError::Transfer {
            direction: task.direction,
            path: task.local.clone(),
            source: Box::new(other),
        },
    })
}

async fn download<A>(api: &A, workspace_id: &str, root: &Path, task: &TransferTask) -> Result<u64>
where
    A: WorkspaceApi + ?Sized,
{
    let relative = task.local.to_str().ok_or_else(|| SyncError::InvalidPath {
        path: task.local.display().to_string(),
        reason: "not valid UTF-8",
    })?;
    let target = validate_path(root, relative)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;
    }

    let Download {
        content_length,
        mut body,
    } = api.download_file(workspace_id, &task.remote).await?;

    let temp_path = temp_path_for(&target);
    let guard = TempFileGuard::new(&temp_path);
    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| SyncError::io(&temp_path, e))?;

    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            // A body cut short of the advertised length is a partial transfer.
            Err(e) => match content_length {
                Some(expected) if written < expected && e.class() == FailureClass::Network => {
                    debug!(path = %task.local.display(), error = %e, "body ended early");
                    return Err(SyncError::LengthMismatch {
                        path: task.local.clone(),
                        expected,
                        actual: written,
                    });
                }
                _ => return Err(e),
            },
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::io(&temp_path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| SyncError::io(&temp_path, e))?;
    drop(file);

    if let Some(expected) = content_length {
        if expected != written {
            return Err(SyncError::LengthMismatch {
                path: task.local.clone(),
                expected,
                actual: written,
            });
        }
    }

    fs::rename(guard.path(), &target)
        .await
        .map_err(|e| SyncError::io(&target, e))?;
    guard.defuse();

    if let Some(millis) = task.modified {
        let mtime = FileTime::from_unix_time(
            millis.div_euclid(1000),
            (millis.rem_euclid(1000) * 1_000_000) as u32,
        );
        let path = target.clone();
        match tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("could not set mtime on {}: {}", target.display(), e),
            Err(e) => warn!("could not set mtime on {}: {}", target.display(), e),
        }
    }

    debug!(path = %task.local.display(), bytes = written, "downloaded");
    Ok(written)
}

async fn upload<A>(api: &A, workspace_id: &str, root: &Path, task: &TransferTask) -> Result<u64>
where
    A: WorkspaceApi + ?Sized,
{
    let path = root.join(&task.local);
    let content = fs::read(&path).await.map_err(|e| SyncError::io(&path, e))?;
    let len = content.len() as u64;
    api.upload_file(workspace_id, &task.remote, Bytes::from(content))
        .await?;
    debug!(path = %task.local.display(), remote = %task.remote, bytes = len, "uploaded");
    Ok(len)
}
