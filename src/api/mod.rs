//! Remote workspace API.
//!
//! [`WorkspaceApi`] is the single interface the engine talks to. [`ApiClient`]
//! implements it over HTTP; tests substitute in-memory fakes.

pub mod client;
#[cfg(test)]
pub(crate) mod fake;
pub mod types;

pub use client::{ApiClient, DEFAULT_BASE_URL};
pub use types::{
    Advise, File, FileInfo, Location, ModuleInfo, Port, Problem, Record, SimCodeType, Workspace,
};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Stream of raw body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Body of a file download.
pub struct Download {
    /// Value of the `Content-Length` header, if the server sent one.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl Download {
    /// Download whose body is already in memory.
    pub fn from_bytes(content: impl Into<Bytes>) -> Self {
        let content: Bytes = content.into();
        Self {
            content_length: Some(content.len() as u64),
            body: Box::pin(futures::stream::once(async move { Ok(content) })),
        }
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Operations offered by the remote workspace service.
#[async_trait]
pub trait WorkspaceApi: Send + Sync + 'static {
    /// Create a workspace and return its id.
    async fn create_workspace(&self, name: &str, email: &str) -> Result<String>;

    /// Fetch the full state of a workspace.
    async fn workspace_info(&self, id: &str) -> Result<Workspace>;

    /// Add or replace `rel_path` in the workspace.
    async fn upload_file(&self, id: &str, rel_path: &str, content: Bytes) -> Result<()>;

    /// Start downloading the resource behind `file_uri`.
    async fn download_file(&self, id: &str, file_uri: &str) -> Result<Download>;

    /// Remove `rel_path` from the workspace. Returns whether the server confirmed it.
    async fn delete_file(&self, id: &str, rel_path: &str) -> Result<bool>;

    /// Ask the compiler to validate the workspace.
    async fn validate(&self, id: &str) -> Result<Workspace>;

    /// Request generated simulation code for `module`; returns download URIs.
    async fn request_sim_code(&self, id: &str, kind: SimCodeType, module: &str)
        -> Result<Vec<String>>;

    /// Obtain a client id for an event subscription.
    async fn client_id(&self, id: &str) -> Result<String>;

    /// Open the server-sent event stream for `client_id`.
    async fn open_event_stream(&self, id: &str, client_id: &str) -> Result<ByteStream>;

    /// Tell the server the subscriber is listening.
    async fn announce_client(&self, id: &str, client_id: &str) -> Result<()>;
}
