//! Workspace lifecycle and the watch/react loop.
//!
//! ```text
//! Uninitialized ──create──▶ Created ─┐
//!       │                            ├─watch──▶ Watching ──▶ Terminated
//!       └──────open──────▶ Opened ───┘
//! ```
//!
//! The engine is the only owner of the workspace snapshot. It handles one
//! local change or remote event at a time and awaits any transfer before
//! taking the next, so at most one batch is ever in flight.

use super::marker::WorkspaceMarker;
use super::watcher::{ChangeKind, LocalChange, LocalWatcher};
use crate::api::{Record, SimCodeType, Workspace, WorkspaceApi};
use crate::config::{Config, DeletePolicy};
use crate::error::{Result, SyncError};
use crate::events::{Event, EventSubscription};
use crate::path::{rel_path_from_uri, remote_name};
use crate::transfer::{unit, BatchReport, BatchTransfer, TransferTask};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Created { id: String },
    Opened { id: String },
    Watching { id: String },
    Terminated,
}

impl SyncState {
    pub fn id(&self) -> Option<&str> {
        match self {
            SyncState::Created { id } | SyncState::Opened { id } | SyncState::Watching { id } => {
                Some(id)
            }
            SyncState::Uninitialized | SyncState::Terminated => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Uninitialized => f.write_str("uninitialized"),
            SyncState::Created { id } => write!(f, "created ({})", id),
            SyncState::Opened { id } => write!(f, "opened ({})", id),
            SyncState::Watching { id } => write!(f, "watching ({})", id),
            SyncState::Terminated => f.write_str("terminated"),
        }
    }
}

pub struct SyncEngine<A: WorkspaceApi + ?Sized> {
    api: Arc<A>,
    root: PathBuf,
    config: Config,
    marker: WorkspaceMarker,
    state: SyncState,
    workspace: Workspace,
    show_progress: bool,
}

impl<A: WorkspaceApi + ?Sized> SyncEngine<A> {
    pub fn new(api: Arc<A>, root: impl Into<PathBuf>, config: Config) -> Self {
        let root = root.into();
        let marker = WorkspaceMarker::new(&root, &config.sync.marker);
        Self {
            api,
            root,
            config,
            marker,
            state: SyncState::Uninitialized,
            workspace: Workspace::default(),
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr during batch downloads.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn marker(&self) -> &WorkspaceMarker {
        &self.marker
    }

    /// Ask the server for a new workspace and bind the sync root to it.
    pub async fn create(&mut self) -> Result<String> {
        self.expect_uninitialized("create")?;
        let result = self.try_create().await;
        self.settle(result)
    }

    async fn try_create(&mut self) -> Result<String> {
        let api = &self.config.api;
        let id = self.api.create_workspace(&api.name, &api.email).await?;
        self.marker.write(&id)?;
        info!("created workspace {}", id);
        self.workspace = Workspace {
            id: id.clone(),
            ..Default::default()
        };
        self.state = SyncState::Created { id: id.clone() };
        Ok(id)
    }

    /// Bind the sync root to the existing workspace `id`.
    pub async fn open(&mut self, id: &str) -> Result<()> {
        self.expect_uninitialized("open")?;
        let result = self.try_open(id, true).await;
        self.settle(result)
    }

    /// Like [`open`](Self::open), but leaves the marker file untouched.
    pub async fn attach(&mut self, id: &str) -> Result<()> {
        self.expect_uninitialized("attach")?;
        let result = self.try_open(id, false).await;
        self.settle(result)
    }

    async fn try_open(&mut self, id: &str, persist: bool) -> Result<()> {
        self.workspace = self.fetch(id).await?;
        if persist {
            self.marker.write(id)?;
        }
        info!(
            "opened workspace {} ({} files)",
            id,
            self.workspace.files.len()
        );
        self.state = SyncState::Opened { id: id.to_string() };
        Ok(())
    }

    /// Open the workspace named by `id`, or by the marker file, or create a
    /// new one when neither exists.
    pub async fn resume_or_create(&mut self, id: Option<&str>) -> Result<String> {
        let id = match id {
            Some(id) => Some(id.to_string()),
            None => self.marker.read()?,
        };
        match id {
            Some(id) => {
                self.open(&id).await?;
                Ok(id)
            }
            None => self.create().await,
        }
    }

    /// Replace the workspace snapshot with the server's current state.
    pub async fn refresh(&mut self) -> Result<()> {
        let id = self.require_id("refresh")?;
        let result = self.fetch(&id).await;
        self.workspace = self.settle(result)?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Workspace> {
        let workspace = self.api.workspace_info(id).await?;
        if workspace.id != id {
            return Err(SyncError::WorkspaceMismatch {
                requested: id.to_string(),
                returned: workspace.id,
            });
        }
        Ok(workspace)
    }

    /// Download every file of the workspace into the sync root.
    pub async fn initial_sync(&mut self) -> Result<BatchReport> {
        let id = match &self.state {
            SyncState::Created { id } | SyncState::Opened { id } => id.clone(),
            other => {
                return Err(SyncError::InvalidState {
                    operation: "sync",
                    state: other.to_string(),
                })
            }
        };
        let records = self.workspace.records();
        let result = self.download(&id, &self.root, records).await;
        let report = self.settle(result)?;
        info!(
            "initial sync: {} files, {} bytes in {:.1?}",
            report.files, report.bytes, report.elapsed
        );
        Ok(report)
    }

    /// Request generated simulation code for `module` and download it into
    /// `dir`. With `base_only` the generated directory structure is dropped.
    pub async fn fetch_sim_code(
        &mut self,
        kind: SimCodeType,
        module: &str,
        dir: &Path,
        base_only: bool,
    ) -> Result<BatchReport> {
        let id = self.require_id("fetch simulation code")?;
        let uris = self.api.request_sim_code(&id, kind, module).await?;
        debug!("simulation code for {}: {:?}", module, uris);
        let records = uris
            .iter()
            .map(|uri| Record::new(rel_path_from_uri(uri, base_only), uri.as_str()))
            .collect();
        self.download(&id, dir, records).await
    }

    /// Watch the sync root and the remote event stream until `shutdown`
    /// fires or a fatal error occurs.
    pub async fn watch_all(&mut self, shutdown: CancellationToken) -> Result<()> {
        let id = self.require_id("watch")?;
        let sync = &self.config.sync;
        let local = LocalWatcher::spawn(&self.root, &sync.suffix, sync.debounce())?;
        let remote = self.subscribe(&id, shutdown.child_token());
        self.watch(Some(local), Some(remote), shutdown).await
    }

    /// Follow the remote event stream only.
    pub async fn stream_events(&mut self, shutdown: CancellationToken) -> Result<()> {
        let id = self.require_id("stream")?;
        let remote = self.subscribe(&id, shutdown.child_token());
        self.watch(None, Some(remote), shutdown).await
    }

    fn subscribe(&self, id: &str, shutdown: CancellationToken) -> EventSubscription {
        EventSubscription::spawn(
            Arc::clone(&self.api),
            id,
            self.config.stream.clone(),
            shutdown,
        )
    }

    /// React to `local` changes and `remote` events until `shutdown` fires or
    /// a fatal error occurs. Either source may be absent.
    pub async fn watch(
        &mut self,
        mut local: Option<LocalWatcher>,
        mut remote: Option<EventSubscription>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let id = match &self.state {
            SyncState::Created { id } | SyncState::Opened { id } => id.clone(),
            other => {
                return Err(SyncError::InvalidState {
                    operation: "watch",
                    state: other.to_string(),
                })
            }
        };
        self.state = SyncState::Watching { id };

        let result = self.react(&mut local, &mut remote, &shutdown).await;
        if let Err(e) = &result {
            warn!("stopped watching: {}", e);
        }
        self.state = SyncState::Terminated;
        result
    }

    async fn react(
        &mut self,
        local: &mut Option<LocalWatcher>,
        remote: &mut Option<EventSubscription>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let mut local_open = local.is_some();
        let remote_open = remote.is_some();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutting down");
                    return Ok(());
                }
                change = next_change(local), if local_open => match change {
                    Some(change) => self.handle_local_change(&change).await?,
                    None => {
                        warn!("file watcher stopped");
                        local_open = false;
                    }
                },
                event = next_event(remote), if remote_open => match event {
                    Some(Ok(event)) => self.handle_remote_event(&event).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(SyncError::StreamClosed),
                },
                else => return Ok(()),
            }
        }
    }

    /// Push a local change to the workspace.
    pub async fn handle_local_change(&mut self, change: &LocalChange) -> Result<()> {
        let id = self.require_id("upload")?;
        let name = remote_name(&change.path)?;

        match change.kind {
            ChangeKind::Remove => match self.config.sync.delete_policy {
                DeletePolicy::Ignore => {
                    info!("{} removed locally, remote copy kept", name);
                }
                DeletePolicy::Propagate => {
                    if self.api.delete_file(&id, &name).await? {
                        info!("deleted {} from workspace {}", name, id);
                    } else {
                        warn!("server did not confirm deletion of {}", name);
                    }
                }
            },
            ChangeKind::Create | ChangeKind::Write => {
                let task = TransferTask::upload(change.path.clone(), name.as_str());
                let token = CancellationToken::new();
                match unit::run(self.api.as_ref(), &id, &self.root, &task, &token).await {
                    Ok(bytes) => info!("uploaded {} ({} bytes)", name, bytes),
                    Err(e) if is_not_found(&e) => {
                        warn!("{} disappeared before it could be uploaded", name);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                if self.config.sync.validate_after_upload {
                    self.validate(&id).await;
                }
            }
        }
        Ok(())
    }

    /// Validation problems are reported, never fatal.
    async fn validate(&mut self, id: &str) {
        match self.api.validate(id).await {
            Ok(workspace) if workspace.id == id => {
                for file in &workspace.files {
                    for problem in &file.info.problems {
                        warn!("{}:{}", file.record.rel_path, problem);
                    }
                }
                info!(
                    "validated workspace {}: {} problems",
                    id,
                    workspace.problem_count()
                );
                self.workspace = workspace;
            }
            Ok(workspace) => {
                debug!(
                    "validate returned workspace {:?}, keeping snapshot",
                    workspace.id
                );
            }
            Err(e) => warn!("validation of workspace {} failed: {}", id, e),
        }
    }

    /// React to one remote event. Only compiler output the operator asked
    /// for is downloaded.
    pub async fn handle_remote_event(&mut self, event: &Event) -> Result<()> {
        let id = self.require_id("handle events")?;

        match event {
            Event::WorkspaceAdded { .. }
            | Event::WorkspaceUpdated { .. }
            | Event::WorkspaceDeleted { .. } => {
                let names: Vec<String> = event
                    .referenced_files()
                    .into_iter()
                    .map(|r| r.rel_path)
                    .collect();
                info!("{}: {}", event.subject(), names.join(", "));
            }
            Event::CompilerOutputReady { kind, .. } => {
                let records = event.referenced_files();
                if !self.config.artifacts.wants(kind) {
                    info!("{} output ready ({} files), not selected", kind, records.len());
                    return Ok(());
                }
                let result = self.download(&id, &self.root, records).await;
                let report = self.settle(result)?;
                info!(
                    "{} output: downloaded {} files ({} bytes)",
                    kind, report.files, report.bytes
                );
            }
            Event::Ping { .. } | Event::Unknown { .. } => {}
        }
        Ok(())
    }

    async fn download(&self, id: &str, root: &Path, records: Vec<Record>) -> Result<BatchReport> {
        let tasks: Vec<TransferTask> = records.iter().map(TransferTask::download).collect();
        BatchTransfer::new(Arc::clone(&self.api), id, root)
            .with_config(&self.config.transfer)
            .with_progress(self.progress_bar(tasks.len()))
            .run(tasks)
            .await
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress || len == 0 {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:30} {pos}/{len} files")
        {
            bar.set_style(style);
        }
        bar
    }

    fn require_id(&self, operation: &'static str) -> Result<String> {
        self.state
            .id()
            .map(str::to_string)
            .ok_or_else(|| SyncError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
    }

    fn expect_uninitialized(&self, operation: &'static str) -> Result<()> {
        if self.state != SyncState::Uninitialized {
            return Err(SyncError::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Fatal errors end the engine's life.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = SyncState::Terminated;
        }
        result
    }
}

async fn next_change(local: &mut Option<LocalWatcher>) -> Option<LocalChange> {
    match local {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}

async fn next_event(remote: &mut Option<EventSubscription>) -> Option<Result<Event>> {
    match remote {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

fn is_not_found(err: &SyncError) -> bool {
    match err {
        SyncError::Io { source, .. } => source.kind() == ErrorKind::NotFound,
        SyncError::Transfer { source, .. } => is_not_found(source),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeApi, FakeFile};
    use crate::api::File;
    use crate::config::{ArtifactSelection, SyncSettings};
    use crate::events::classify;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn workspace_1234() -> Workspace {
        let mut record = Record::new("test.pshdl", "/api/v0.1/workspace/1234/test.pshdl");
        record.last_modified = 1387740467000;
        Workspace {
            id: "1234".into(),
            files: vec![File {
                record,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn engine(api: &Arc<FakeApi>, dir: &TempDir) -> SyncEngine<FakeApi> {
        SyncEngine::new(Arc::clone(api), dir.path(), Config::default())
    }

    #[tokio::test]
    async fn test_create_writes_marker() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut engine = engine(&api, &dir);

        let id = engine.create().await.unwrap();

        assert_eq!(id, "1234");
        assert_eq!(engine.state(), &SyncState::Created { id: "1234".into() });
        assert_eq!(engine.marker().read().unwrap().as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn test_open_rejects_other_workspace() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let mut engine = engine(&api, &dir);

        let err = engine.open("ABCD").await.unwrap_err();

        assert!(matches!(err, SyncError::WorkspaceMismatch { .. }));
        assert_eq!(engine.state(), &SyncState::Terminated);
        assert!(!engine.marker().exists());
    }

    #[tokio::test]
    async fn test_attach_leaves_marker_alone() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let mut engine = engine(&api, &dir);

        engine.attach("1234").await.unwrap();

        assert_eq!(engine.state(), &SyncState::Opened { id: "1234".into() });
        assert!(!engine.marker().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_resume_uses_marker() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".wid"), "1234\n").unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let mut engine = engine(&api, &dir);

        engine.resume_or_create(None).await.unwrap();

        assert_eq!(engine.state(), &SyncState::Opened { id: "1234".into() });
        assert_eq!(engine.workspace().files.len(), 1);
    }

    #[tokio::test]
    async fn test_operations_need_a_workspace() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());
        let mut engine = engine(&api, &dir);

        let err = engine.initial_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState { .. }));
        let err = engine
            .handle_local_change(&LocalChange::new(dir.path().join("a.pshdl"), ChangeKind::Write))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_delete_policy() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let removed = LocalChange::new(dir.path().join("test.pshdl"), ChangeKind::Remove);

        let mut ignoring = engine(&api, &dir);
        ignoring.open("1234").await.unwrap();
        ignoring.handle_local_change(&removed).await.unwrap();
        assert!(api.deletes.lock().unwrap().is_empty());

        let config = Config::default()
            .with_sync(SyncSettings::default().with_delete_policy(DeletePolicy::Propagate));
        let mut propagating = SyncEngine::new(Arc::clone(&api), dir.path(), config);
        propagating.open("1234").await.unwrap();
        propagating.handle_local_change(&removed).await.unwrap();
        assert_eq!(*api.deletes.lock().unwrap(), vec!["test.pshdl".to_string()]);
    }

    #[tokio::test]
    async fn test_vanished_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let mut engine = engine(&api, &dir);
        engine.open("1234").await.unwrap();

        let change = LocalChange::new(dir.path().join("gone.pshdl"), ChangeKind::Write);
        engine.handle_local_change(&change).await.unwrap();

        assert!(api.uploads().is_empty());
        assert_eq!(api.validations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_without_validation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("test.pshdl"), "module test {}").unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let config = Config::default()
            .with_sync(SyncSettings::default().with_validate_after_upload(false));
        let mut engine = SyncEngine::new(Arc::clone(&api), dir.path(), config);
        engine.open("1234").await.unwrap();

        let change = LocalChange::new(dir.path().join("test.pshdl"), ChangeKind::Write);
        engine.handle_local_change(&change).await.unwrap();

        let uploads = api.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "test.pshdl");
        assert_eq!(&uploads[0].1[..], b"module test {}");
        assert_eq!(api.validations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unselected_compiler_output_is_not_downloaded() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let uri = "/api/v0.1/workspace/1234/src-gen:vhdl:Blinky.vhd";
        api.add_file(uri, FakeFile::new("entity Blinky;"));
        let event = classify(
            format!(
                r#"{{"subject":"P:COMPILER:VHDL","contents":[{{"files":[{{"relPath":"src-gen/vhdl/Blinky.vhd","fileURI":"{}"}}]}}]}}"#,
                uri
            )
            .as_bytes(),
        )
        .unwrap();

        let mut engine = engine(&api, &dir);
        engine.open("1234").await.unwrap();
        engine.handle_remote_event(&event).await.unwrap();
        assert_eq!(api.download_calls.load(Ordering::SeqCst), 0);

        let config = Config::default().with_artifacts(ArtifactSelection {
            vhdl: true,
            ..Default::default()
        });
        let mut selecting = SyncEngine::new(Arc::clone(&api), dir.path(), config);
        selecting.open("1234").await.unwrap();
        selecting.handle_remote_event(&event).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src-gen/vhdl/Blinky.vhd")).unwrap(),
            "entity Blinky;"
        );
    }

    #[tokio::test]
    async fn test_fetch_sim_code() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let header = "/api/v0.1/workspace/1234/src-gen:psex:c:pshdl_generic_sim.h";
        let source = "/api/v0.1/workspace/1234/src-gen:psex:c:Blinky.c";
        api.add_file(header, FakeFile::new("#pragma once"));
        api.add_file(source, FakeFile::new("int main;"));
        *api.sim_uris.lock().unwrap() = vec![header.to_string(), source.to_string()];

        let mut engine = engine(&api, &dir);
        engine.open("1234").await.unwrap();
        let out = dir.path().join("sim");
        let report = engine
            .fetch_sim_code(SimCodeType::C, "de.tuhh.Blinky", &out, true)
            .await
            .unwrap();

        assert_eq!(report.files, 2);
        assert!(out.join("pshdl_generic_sim.h").exists());
        assert!(out.join("Blinky.c").exists());

        let err = engine
            .fetch_sim_code(SimCodeType::C, "", &out, true)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingModuleName));
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::with_workspace(workspace_1234()));
        let mut engine = engine(&api, &dir);
        engine.open("1234").await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        engine.stream_events(shutdown).await.unwrap();
        assert_eq!(engine.state(), &SyncState::Terminated);
    }
}
