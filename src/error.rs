//! Error types for hdlsync.

use std::path::PathBuf;
use thiserror::Error;

use crate::transfer::Direction;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The server answered with a status outside the 2xx range.
    #[error("{method} {url}: {status} {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Connection-level failure (refused, reset, body read error).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL {url}: {message}")]
    Url { url: String, message: String },

    /// A JSON document (workspace info or event payload) could not be decoded.
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("{path}: received {actual} bytes, server advertised {expected}")]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The server returned a workspace other than the one requested.
    #[error("requested workspace {requested} but the server returned {returned}")]
    WorkspaceMismatch { requested: String, returned: String },

    #[error("workspace id not set")]
    MissingWorkspaceId,

    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{direction} of {path} failed: {source}")]
    Transfer {
        direction: Direction,
        path: PathBuf,
        #[source]
        source: Box<SyncError>,
    },

    #[error("could not {direction} all files ({completed}/{total} done): {source}")]
    BatchFailed {
        direction: Direction,
        completed: usize,
        total: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("transfer task failed to run: {0}")]
    TaskFailed(String),

    #[error("event stream read error: {0}")]
    StreamRead(#[from] std::io::Error),

    #[error("event stream closed")]
    StreamClosed,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("missing moduleName")]
    MissingModuleName,

    #[error("unsupported SimCodeType:{0}")]
    UnsupportedSimCode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

/// Coarse classification of a failure, used for transfer outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Network,
    Decode,
    LengthMismatch,
    Filesystem,
    Cancelled,
    Other,
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        SyncError::Decode {
            context: context.into(),
            source,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::Http { .. }
            | SyncError::Transport(_)
            | SyncError::StreamRead(_)
            | SyncError::StreamClosed => FailureClass::Network,
            SyncError::Decode { .. } | SyncError::Protocol(_) => FailureClass::Decode,
            SyncError::LengthMismatch { .. } => FailureClass::LengthMismatch,
            SyncError::Io { .. } | SyncError::InvalidPath { .. } | SyncError::Watch(_) => {
                FailureClass::Filesystem
            }
            SyncError::Cancelled => FailureClass::Cancelled,
            SyncError::Transfer { source, .. } | SyncError::BatchFailed { source, .. } => {
                source.class()
            }
            _ => FailureClass::Other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.class() == FailureClass::Cancelled
    }
}
