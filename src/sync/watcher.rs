//! Local source file watching.
//!
//! A `notify` watcher on the sync root forwards raw events into a channel;
//! a debounce task folds bursts (editors often write a file in several
//! steps) into one [`LocalChange`] per path. Only files ending in the
//! configured suffix are reported and metadata-only changes are dropped.

use crate::error::Result;
use crate::path::has_suffix;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Write,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl LocalChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Watches the sync root until dropped.
pub struct LocalWatcher {
    _watcher: Option<RecommendedWatcher>,
    changes: mpsc::Receiver<LocalChange>,
    task: Option<JoinHandle<()>>,
}

impl LocalWatcher {
    pub fn spawn(root: &Path, suffix: &str, debounce: Duration) -> Result<Self> {
        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<NotifyEvent>>(100);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.blocking_send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        info!("watching {} for *{} changes", root.display(), suffix);

        let (tx, changes) = mpsc::channel(100);
        let task = tokio::spawn(debounce_loop(notify_rx, tx, suffix.to_string(), debounce));

        Ok(Self {
            _watcher: Some(watcher),
            changes,
            task: Some(task),
        })
    }

    /// Changes supplied by the caller instead of the file system.
    pub fn from_receiver(changes: mpsc::Receiver<LocalChange>) -> Self {
        Self {
            _watcher: None,
            changes,
            task: None,
        }
    }

    pub async fn next(&mut self) -> Option<LocalChange> {
        self.changes.recv().await
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Changes described by one raw notification, filtered by `suffix`.
fn changes_from(event: &NotifyEvent, suffix: &str) -> Vec<LocalChange> {
    let kind_for = |path: &Path| -> Option<ChangeKind> {
        match event.kind {
            EventKind::Create(_) => Some(ChangeKind::Create),
            EventKind::Remove(_) => Some(ChangeKind::Remove),
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Create),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Remove),
            EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
                ChangeKind::Create
            } else {
                ChangeKind::Remove
            }),
            EventKind::Modify(_) => Some(ChangeKind::Write),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    };

    event
        .paths
        .iter()
        .filter(|p| has_suffix(p, suffix))
        .filter_map(|p| kind_for(p).map(|kind| LocalChange::new(p.clone(), kind)))
        .collect()
}

/// Changes seen during the current debounce window, one per path.
#[derive(Debug, Default)]
struct PendingChanges {
    changes: Vec<LocalChange>,
}

impl PendingChanges {
    fn push(&mut self, change: LocalChange) {
        match self.changes.iter_mut().find(|c| c.path == change.path) {
            // A freshly created file that is then written is still new.
            Some(existing)
                if existing.kind == ChangeKind::Create && change.kind == ChangeKind::Write => {}
            Some(existing) => existing.kind = change.kind,
            None => self.changes.push(change),
        }
    }

    fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn take(&mut self) -> Vec<LocalChange> {
        std::mem::take(&mut self.changes)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn debounce_loop(
    mut raw: mpsc::Receiver<notify::Result<NotifyEvent>>,
    tx: mpsc::Sender<LocalChange>,
    suffix: String,
    debounce: Duration,
) {
    let mut pending = PendingChanges::default();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            res = raw.recv() => match res {
                Some(Ok(event)) => {
                    let changes = changes_from(&event, &suffix);
                    if changes.is_empty() {
                        continue;
                    }
                    debug!("file event: {:?}", event);
                    for change in changes {
                        pending.push(change);
                    }
                    deadline = Some(Instant::now() + debounce);
                }
                Some(Err(e)) => warn!("file watcher error: {}", e),
                None => break,
            },
            _ = sleep_until(deadline), if !pending.is_empty() => {
                deadline = None;
                for change in pending.take() {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
