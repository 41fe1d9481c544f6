//! Client-side sync agent for PSHDL compiler workspaces.
//!
//! A local directory of `.pshdl` sources is bound to a server-hosted
//! workspace. Local edits are uploaded as they happen; compiler output
//! announced on the workspace event stream is downloaded on request.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod path;
pub mod sync;
pub mod temp_file;
pub mod transfer;

pub use api::{ApiClient, WorkspaceApi};
pub use config::Config;
pub use error::{Result, SyncError};
pub use sync::{SyncEngine, SyncState};
