//! Keeping a local directory and a remote workspace in step.

pub mod engine;
pub mod marker;
pub mod watcher;

pub use engine::{SyncEngine, SyncState};
pub use marker::WorkspaceMarker;
pub use watcher::{ChangeKind, LocalChange, LocalWatcher};
