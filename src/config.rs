//! Configuration file and defaults.
//!
//! Everything is optional in the file; missing keys fall back to the
//! defaults below and CLI flags override whatever was loaded.

use crate::api::DEFAULT_BASE_URL;
use crate::error::{Result, SyncError};
use crate::events::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncSettings,
    pub transfer: TransferConfig,
    pub stream: ReconnectPolicy,
    pub artifacts: ArtifactSelection,
}

impl Config {
    /// Get the config file path (~/.config/hdlsync/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hdlsync").join("config.toml"))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Config::default()),
            },
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        Self::from_toml(&contents)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    pub fn with_sync(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_reconnect(mut self, stream: ReconnectPolicy) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactSelection) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Remote service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Display name sent when creating a workspace.
    pub name: String,
    /// Contact address sent when creating a workspace.
    pub email: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!("hdlsync/", env!("CARGO_PKG_VERSION")).to_string(),
            name: "hdlsync".to_string(),
            email: String::new(),
        }
    }
}

impl ApiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// What happens when a watched source file is removed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Log the removal and leave the remote file alone.
    #[default]
    Ignore,
    /// Delete the remote file of the same name.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Only local files ending in this suffix are watched and uploaded.
    pub suffix: String,
    /// Name of the workspace id file in the sync root.
    pub marker: String,
    pub validate_after_upload: bool,
    pub delete_policy: DeletePolicy,
    pub debounce_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            suffix: ".pshdl".to_string(),
            marker: ".wid".to_string(),
            validate_after_upload: true,
            delete_policy: DeletePolicy::Ignore,
            debounce_ms: 100,
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn with_validate_after_upload(mut self, validate: bool) -> Self {
        self.validate_after_upload = validate;
        self
    }
}

/// How a batch reacts to its first failed unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Cancel outstanding units and wait for them to stop.
    #[default]
    Cancel,
    /// Leave outstanding units running in the background.
    Detach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Seconds without a completed unit before a progress notice is logged.
    pub heartbeat_secs: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 5,
            failure_policy: FailurePolicy::Cancel,
        }
    }
}

impl TransferConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Reopening a dropped event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reopen attempts after the stream drops; 0 disables reconnecting.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn no_reconnect() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles each
    /// time, capped at `max_backoff_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(ms)
    }
}

/// Which generated artifacts are downloaded when the compiler reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSelection {
    pub vhdl: bool,
    pub csim: bool,
    pub other: bool,
}

impl ArtifactSelection {
    pub fn wants(&self, kind: &ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Vhdl => self.vhdl,
            ArtifactKind::CSim => self.csim,
            ArtifactKind::Other(_) => self.other,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.vhdl || self.csim || self.other)
    }
}
