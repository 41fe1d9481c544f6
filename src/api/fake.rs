//! In-memory [`WorkspaceApi`] for unit tests.

use super::{ByteStream, Download, SimCodeType, Workspace, WorkspaceApi};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FakeFile {
    pub content: Bytes,
    /// Overrides the advertised length; defaults to the real one.
    pub advertised: Option<u64>,
    pub delay: Duration,
    pub fail: bool,
}

impl FakeFile {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_advertised(mut self, len: u64) -> Self {
        self.advertised = Some(len);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeApi {
    pub workspace: Mutex<Workspace>,
    pub files: Mutex<HashMap<String, FakeFile>>,
    pub uploads: Mutex<Vec<(String, Bytes)>>,
    pub deletes: Mutex<Vec<String>>,
    pub sim_uris: Mutex<Vec<String>>,
    /// Chunks served by successive event stream opens. Once exhausted the
    /// stream stays open without data.
    pub event_streams: Mutex<VecDeque<Vec<Bytes>>>,
    pub stream_opens: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub downloads_done: AtomicUsize,
    pub validations: AtomicUsize,
}

impl FakeApi {
    pub fn with_workspace(workspace: Workspace) -> Self {
        Self {
            workspace: Mutex::new(workspace),
            ..Default::default()
        }
    }

    pub fn add_file(&self, uri: &str, file: FakeFile) {
        self.files.lock().unwrap().insert(uri.to_string(), file);
    }

    pub fn push_event_stream<I, B>(&self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.event_streams
            .lock()
            .unwrap()
            .push_back(chunks.into_iter().map(Into::into).collect());
    }

    pub fn uploads(&self) -> Vec<(String, Bytes)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceApi for FakeApi {
    async fn create_workspace(&self, _name: &str, _email: &str) -> Result<String> {
        let mut ws = self.workspace.lock().unwrap();
        if ws.id.is_empty() {
            ws.id = "1234".to_string();
        }
        Ok(ws.id.clone())
    }

    async fn workspace_info(&self, _id: &str) -> Result<Workspace> {
        Ok(self.workspace.lock().unwrap().clone())
    }

    async fn upload_file(&self, _id: &str, rel_path: &str, content: Bytes) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((rel_path.to_string(), content));
        Ok(())
    }

    async fn download_file(&self, _id: &str, file_uri: &str) -> Result<Download> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let file = self.files.lock().unwrap().get(file_uri).cloned();
        let file = file.ok_or_else(|| SyncError::Http {
            method: "GET".into(),
            url: file_uri.into(),
            status: 404,
            body: String::new(),
        })?;
        if !file.delay.is_zero() {
            tokio::time::sleep(file.delay).await;
        }
        if file.fail {
            return Err(SyncError::Http {
                method: "GET".into(),
                url: file_uri.into(),
                status: 500,
                body: "boom".into(),
            });
        }
        self.downloads_done.fetch_add(1, Ordering::SeqCst);
        let mut download = Download::from_bytes(file.content);
        if let Some(len) = file.advertised {
            download.content_length = Some(len);
        }
        Ok(download)
    }

    async fn delete_file(&self, _id: &str, rel_path: &str) -> Result<bool> {
        self.deletes.lock().unwrap().push(rel_path.to_string());
        Ok(true)
    }

    async fn validate(&self, _id: &str) -> Result<Workspace> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        Ok(self.workspace.lock().unwrap().clone())
    }

    async fn request_sim_code(
        &self,
        _id: &str,
        _kind: SimCodeType,
        module: &str,
    ) -> Result<Vec<String>> {
        if module.is_empty() {
            return Err(SyncError::MissingModuleName);
        }
        Ok(self.sim_uris.lock().unwrap().clone())
    }

    async fn client_id(&self, _id: &str) -> Result<String> {
        let n = self.stream_opens.load(Ordering::SeqCst) + 1;
        Ok(format!("client-{}", n))
    }

    async fn open_event_stream(&self, _id: &str, _client_id: &str) -> Result<ByteStream> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        match self.event_streams.lock().unwrap().pop_front() {
            Some(chunks) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok),
            ))),
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }

    async fn announce_client(&self, _id: &str, _client_id: &str) -> Result<()> {
        Ok(())
    }
}
