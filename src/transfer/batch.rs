//! Concurrent batches of transfer units.
//!
//! Every task in a batch runs as its own tokio task. Outcomes are consumed in
//! completion order; the first failure ends the batch according to the
//! configured [`FailurePolicy`].

use super::{unit, BatchReport, Direction, FailurePolicy, TransferOutcome, TransferTask};
use crate::api::WorkspaceApi;
use crate::config::TransferConfig;
use crate::error::{Result, SyncError};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest accepted heartbeat interval.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

pub struct BatchTransfer<A: WorkspaceApi + ?Sized> {
    api: Arc<A>,
    workspace_id: String,
    root: PathBuf,
    heartbeat: Duration,
    policy: FailurePolicy,
    progress: ProgressBar,
}

impl<A: WorkspaceApi + ?Sized> BatchTransfer<A> {
    pub fn new(api: Arc<A>, workspace_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            api,
            workspace_id: workspace_id.into(),
            root: root.into(),
            heartbeat: Duration::from_secs(5),
            policy: FailurePolicy::default(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_config(self, config: &TransferConfig) -> Self {
        self.with_heartbeat(config.heartbeat())
            .with_failure_policy(config.failure_policy)
    }

    /// Interval between progress notices, at least 10 ms.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat.max(MIN_HEARTBEAT);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Advance `progress` by one per completed unit.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Run all tasks concurrently and wait for them.
    ///
    /// Returns the first failure wrapped in [`SyncError::BatchFailed`].
    pub async fn run(&self, tasks: Vec<TransferTask>) -> Result<BatchReport> {
        let total = tasks.len();
        let Some(direction) = tasks.first().map(|t| t.direction) else {
            return Ok(BatchReport::default());
        };

        let start = Instant::now();
        let token = CancellationToken::new();
        let mut set = JoinSet::new();

        self.progress.set_length(total as u64);
        self.progress.set_position(0);

        for task in tasks {
            let api = Arc::clone(&self.api);
            let workspace_id = self.workspace_id.clone();
            let root = self.root.clone();
            let token = token.clone();
            set.spawn(async move {
                let result = unit::run(api.as_ref(), &workspace_id, &root, &task, &token).await;
                TransferOutcome { task, result }
            });
        }

        let mut report = BatchReport::default();
        loop {
            let joined = match timeout(self.heartbeat, set.join_next()).await {
                Err(_) => {
                    report.heartbeats += 1;
                    info!("{} files left, {:.1?}", set.len(), start.elapsed());
                    continue;
                }
                Ok(None) => break,
                Ok(Some(joined)) => joined,
            };

            let result = match joined {
                Ok(TransferOutcome { task, result }) => result.inspect(|bytes| {
                    debug!(path = %task.local.display(), bytes, "{} done", task.direction);
                }),
                Err(e) => Err(SyncError::TaskFailed(e.to_string())),
            };

            match result {
                Ok(bytes) => {
                    report.files += 1;
                    report.bytes += bytes;
                    self.progress.inc(1);
                }
                Err(first) => {
                    return Err(self.abort(set, token, direction, report.files, total, first).await);
                }
            }
        }

        report.elapsed = start.elapsed();
        self.progress.finish_and_clear();
        Ok(report)
    }

    async fn abort(
        &self,
        mut set: JoinSet<TransferOutcome>,
        token: CancellationToken,
        direction: Direction,
        mut completed: usize,
        total: usize,
        first: SyncError,
    ) -> SyncError {
        match self.policy {
            FailurePolicy::Cancel => {
                token.cancel();
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(TransferOutcome { result: Ok(_), .. }) => completed += 1,
                        Ok(TransferOutcome { result: Err(e), .. }) if e.is_cancelled() => {}
                        Ok(TransferOutcome { result: Err(e), .. }) => warn!("{}", e),
                        Err(e) => warn!("transfer task failed to run: {}", e),
                    }
                }
            }
            FailurePolicy::Detach => {
                debug!("detaching {} outstanding transfers", set.len());
                set.detach_all();
            }
        }
        self.progress.abandon();

        SyncError::BatchFailed {
            direction,
            completed,
            total,
            source: Box::new(first),
        }
    }
}
