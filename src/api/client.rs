//! HTTP implementation of [`WorkspaceApi`] on top of `reqwest`.

use super::{ByteStream, Download, SimCodeType, Workspace, WorkspaceApi};
use crate::config::ApiConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://api6.pshdl.org/api/v0.1/";

const ACCEPT_JSON: &str = "application/json";
const ACCEPT_TEXT: &str = "text/plain";
const ACCEPT_EVENTS: &str = "text/event-stream";

const CLIENT_CONNECTED: &str = "P:CLIENT:CONNECTED";

/// Client for the PSHDL REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

#[derive(Serialize)]
struct ClientEvent<'a> {
    #[serde(rename = "clientID")]
    client_id: &'a str,
    #[serde(rename = "timeStamp")]
    timestamp: i64,
    subject: &'a str,
}

impl ApiClient {
    /// Create a client for `base_url`. A trailing slash is added if missing so
    /// relative endpoints resolve below it.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| SyncError::Url {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder().user_agent(user_agent).build()?;

        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.user_agent)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, relative: &str) -> Result<Url> {
        self.base_url.join(relative).map_err(|e| SyncError::Url {
            url: relative.to_string(),
            message: e.to_string(),
        })
    }

    /// Send a request and turn non-2xx answers into [`SyncError::Http`].
    async fn execute(
        &self,
        method: Method,
        url: Url,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response> {
        let start = Instant::now();
        let request = build(self.http.request(method.clone(), url.clone()));
        let response = request.send().await.inspect_err(|e| {
            debug!(%method, path = url.path(), error = %e, "request failed");
        })?;

        let status = response.status();
        debug!(%method, path = url.path(), %status, elapsed = ?start.elapsed(), "request done");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Http {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    async fn fetch_workspace(&self, method: Method, relative: &str) -> Result<Workspace> {
        let url = self.url(relative)?;
        let response = self
            .execute(method, url, |r| r.header(ACCEPT, ACCEPT_JSON))
            .await?;
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Workspace::default());
        }
        serde_json::from_slice(&body).map_err(|e| SyncError::decode(relative, e))
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(SyncError::MissingWorkspaceId);
    }
    Ok(())
}

fn created_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/workspace/([0-9A-Fa-f]+)").expect("static regex"))
}

/// Pull the workspace id out of the body returned by the create endpoint.
pub fn parse_created_id(body: &str) -> Result<String> {
    created_id_regex()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SyncError::Protocol(format!("no workspace id in {:?}", body.trim())))
}

#[async_trait]
impl WorkspaceApi for ApiClient {
    async fn create_workspace(&self, name: &str, email: &str) -> Result<String> {
        let url = self.url("workspace")?;
        let response = self
            .execute(Method::POST, url, |r| {
                r.header(ACCEPT, ACCEPT_TEXT)
                    .form(&[("name", name), ("eMail", email)])
            })
            .await?;
        let body = response.text().await?;
        parse_created_id(&body)
    }

    async fn workspace_info(&self, id: &str) -> Result<Workspace> {
        require_id(id)?;
        self.fetch_workspace(Method::GET, &format!("workspace/{}", id))
            .await
    }

    async fn upload_file(&self, id: &str, rel_path: &str, content: Bytes) -> Result<()> {
        require_id(id)?;
        let url = self.url(&format!("workspace/{}", id))?;
        let part = Part::bytes(content.to_vec()).file_name(rel_path.to_string());
        let form = Form::new().part("file", part);
        self.execute(Method::POST, url, |r| {
            r.header(ACCEPT, ACCEPT_TEXT).multipart(form)
        })
        .await?;
        Ok(())
    }

    async fn download_file(&self, id: &str, file_uri: &str) -> Result<Download> {
        require_id(id)?;
        let url = self.url(file_uri)?;
        let response = self
            .execute(Method::GET, url, |r| r.header(ACCEPT, ACCEPT_TEXT))
            .await?;
        let content_length = response.content_length();
        let body: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SyncError::from))
            .boxed();
        Ok(Download {
            content_length,
            body,
        })
    }

    async fn delete_file(&self, id: &str, rel_path: &str) -> Result<bool> {
        require_id(id)?;
        let url = self.url(&format!("workspace/{}/{}", id, rel_path))?;
        let response = self
            .execute(Method::DELETE, url, |r| r.header(ACCEPT, ACCEPT_TEXT))
            .await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    async fn validate(&self, id: &str) -> Result<Workspace> {
        require_id(id)?;
        self.fetch_workspace(Method::POST, &format!("compiler/{}/validate", id))
            .await
    }

    async fn request_sim_code(
        &self,
        id: &str,
        kind: SimCodeType,
        module: &str,
    ) -> Result<Vec<String>> {
        require_id(id)?;
        if module.is_empty() {
            return Err(SyncError::MissingModuleName);
        }
        let url = self.url(&format!("compiler/{}/psex/{}", id, kind.as_str()))?;
        let response = self
            .execute(Method::POST, url, |r| {
                r.header(ACCEPT, ACCEPT_TEXT).form(&[("module", module)])
            })
            .await?;
        let body = response.text().await?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn client_id(&self, id: &str) -> Result<String> {
        require_id(id)?;
        let url = self.url(&format!("streaming/workspace/{}/clientID", id))?;
        let response = self
            .execute(Method::GET, url, |r| r.header(ACCEPT, ACCEPT_TEXT))
            .await?;
        let client_id = response.text().await?.trim().to_string();
        if client_id.is_empty() {
            return Err(SyncError::Protocol("empty client id".to_string()));
        }
        Ok(client_id)
    }

    async fn open_event_stream(&self, id: &str, client_id: &str) -> Result<ByteStream> {
        require_id(id)?;
        let url = self.url(&format!("streaming/workspace/{}/{}/sse", id, client_id))?;
        let response = self
            .execute(Method::GET, url, |r| r.header(ACCEPT, ACCEPT_EVENTS))
            .await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SyncError::from))
            .boxed())
    }

    async fn announce_client(&self, id: &str, client_id: &str) -> Result<()> {
        require_id(id)?;
        let url = self.url(&format!("streaming/workspace/{}/{}", id, client_id))?;
        let event = ClientEvent {
            client_id,
            timestamp: chrono::Utc::now().timestamp(),
            subject: CLIENT_CONNECTED,
        };
        self.execute(Method::POST, url, |r| {
            r.header(ACCEPT, ACCEPT_JSON).json(&event)
        })
        .await?;
        Ok(())
    }
}
