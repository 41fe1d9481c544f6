//! A local stand-in for the PSHDL REST API.
#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WORKSPACE_JSON: &str = r#"{"files":[ { "record" : { "fileURI" : "/api/v0.1/workspace/1234/test.pshdl", "relPath" : "test.pshdl","lastModified" : 1387740467000}, "syntax" : "unknown","type" : "pshdl","moduleInfos" : [ ] }], "ID":"1234", "lastValIDation":0, "jsonVersion":"1.0", "valIDated":true}"#;

pub const TEST_PSHDL: &str = "module de.tuhh.Test {\n  out bit led;\n}\n";

pub const CREATED_ID: &str = "251C5321A7254D79";

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Default)]
pub struct MockServer {
    requests: Mutex<Vec<Request>>,
    files: Mutex<HashMap<String, String>>,
    sse: Mutex<VecDeque<String>>,
}

impl MockServer {
    /// Serve on an ephemeral port; returns the API base URL.
    pub async fn start() -> (Arc<Self>, String) {
        let server = Arc::new(MockServer::default());
        server.add_file("/api/v0.1/workspace/1234/test.pshdl", TEST_PSHDL);

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&server));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (server, format!("http://{}/api/v0.1/", addr))
    }

    pub fn add_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    /// Body for the next event stream request.
    pub fn push_sse(&self, body: impl Into<String>) {
        self.sse.lock().unwrap().push_back(body.into());
    }

    pub fn requests(&self, method: Method, path: &str) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }

    /// Wait until `count` matching requests were seen.
    pub async fn wait_for(&self, method: Method, path: &str, count: usize) -> Vec<Request> {
        for _ in 0..500 {
            let seen = self.requests(method.clone(), path);
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} {} x{}", method, path, count);
    }
}

fn text(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        body.into(),
    )
        .into_response()
}

fn json(body: &str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle(
    State(server): State<Arc<MockServer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    server.requests.lock().unwrap().push(Request {
        method: method.clone(),
        path: path.clone(),
        headers,
        body,
    });

    if method == Method::GET {
        if let Some(content) = server.files.lock().unwrap().get(&path) {
            return text(StatusCode::OK, content.clone());
        }
    }

    let rest = path.strip_prefix("/api/v0.1/").unwrap_or(&path);
    let segments: Vec<&str> = rest.split('/').collect();
    match (method.as_str(), segments.as_slice()) {
        ("POST", ["workspace"]) => text(
            StatusCode::OK,
            format!("/api/v0.1/workspace/{}", CREATED_ID),
        ),
        ("GET", ["workspace", "9999"]) => text(StatusCode::NOT_FOUND, "no such workspace"),
        ("GET", ["workspace", _]) => json(WORKSPACE_JSON),
        ("POST", ["workspace", _]) => text(StatusCode::OK, ""),
        ("DELETE", ["workspace", _, _]) => text(StatusCode::OK, ""),
        ("POST", ["compiler", _, "validate"]) => json(WORKSPACE_JSON),
        ("POST", ["compiler", id, "psex", _]) => text(
            StatusCode::OK,
            format!(
                "/api/v0.1/workspace/{id}/src-gen:psex:c:pshdl_generic_sim.h\n/api/v0.1/workspace/{id}/src-gen:psex:c:Blinky.c\n"
            ),
        ),
        ("GET", ["streaming", "workspace", _, "clientID"]) => text(StatusCode::OK, "C1\n"),
        ("GET", ["streaming", "workspace", _, _, "sse"]) => {
            let body = server.sse.lock().unwrap().pop_front().unwrap_or_default();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/event-stream")],
                body,
            )
                .into_response()
        }
        ("POST", ["streaming", "workspace", _, _]) => text(StatusCode::OK, ""),
        _ => text(StatusCode::NOT_FOUND, "unknown endpoint"),
    }
}
