//! Workspace data model as served by the PSHDL REST API.
//!
//! Field names follow the server's JSON. The server is loose about casing
//! (`ID`, `valIDated`, ...) and about number types for timestamps, so the
//! deserializers accept both.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Where a file lives remotely and when it last changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    #[serde(rename = "fileURI", alias = "fileUri")]
    pub file_uri: String,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "opt_string")]
    pub hash: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(deserialize_with = "whole_number")]
    pub last_modified: i64,
    pub rel_path: String,
}

impl Record {
    pub fn new(rel_path: impl Into<String>, file_uri: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            file_uri: file_uri.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advise {
    pub explanation: String,
    pub message: String,
    pub solutions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    #[serde(deserialize_with = "whole_number")]
    pub length: i64,
    #[serde(deserialize_with = "whole_number")]
    pub line: i64,
    #[serde(deserialize_with = "whole_number")]
    pub offset_in_line: i64,
    #[serde(deserialize_with = "whole_number")]
    pub total_offset: i64,
}

/// A compiler diagnostic attached to a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Problem {
    pub advise: Advise,
    pub error_code: String,
    pub location: Location,
    #[serde(deserialize_with = "whole_number")]
    pub pid: i64,
    pub severity: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} [{}] {}",
            self.location.line,
            self.location.offset_in_line,
            self.severity,
            self.error_code,
            self.advise.message
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    pub annotations: Vec<String>,
    pub dimensions: Vec<serde_json::Value>,
    pub dir: String,
    pub name: String,
    pub primitive: String,
    pub width: f64,
}

/// Ports and instances of one module, as reported by the compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleInfo {
    pub instances: Vec<String>,
    pub name: String,
    pub ports: Vec<Port>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Module[{}] - {}", self.kind, self.name)?;
        writeln!(f, "Instances: {:?}", self.instances)?;
        writeln!(f, "Ports:")?;
        for (i, port) in self.ports.iter().enumerate() {
            writeln!(
                f,
                "#{:2} [{:<10}] <{:2.0} bits>{:<10}",
                i, port.dir, port.width, port.name
            )?;
        }
        Ok(())
    }
}

/// Compilation info for a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    #[serde(deserialize_with = "whole_number")]
    pub created: i64,
    pub files: Vec<Record>,
    pub problems: Vec<Problem>,
}

/// A source file in a workspace plus its compiler metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct File {
    pub info: FileInfo,
    pub module_infos: Vec<ModuleInfo>,
    pub record: Record,
    pub syntax: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Full state of a remote workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workspace {
    #[serde(alias = "ID", alias = "Id")]
    pub id: String,
    pub files: Vec<File>,
    #[serde(alias = "JsonVersion")]
    pub json_version: String,
    #[serde(alias = "lastValIDation", deserialize_with = "whole_number")]
    pub last_validation: i64,
    #[serde(alias = "valIDated")]
    pub validated: bool,
}

impl Workspace {
    /// Records of every file currently in the workspace.
    pub fn records(&self) -> Vec<Record> {
        self.files.iter().map(|f| f.record.clone()).collect()
    }

    pub fn problem_count(&self) -> usize {
        self.files.iter().map(|f| f.info.problems.len()).sum()
    }
}

/// Target language for generated simulation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCodeType {
    C,
    Go,
}

impl SimCodeType {
    /// Path segment used by the compiler endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimCodeType::C => "c",
            SimCodeType::Go => "go",
        }
    }
}

impl std::str::FromStr for SimCodeType {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(SimCodeType::C),
            "go" => Ok(SimCodeType::Go),
            other => Err(crate::error::SyncError::UnsupportedSimCode(other.to_string())),
        }
    }
}

/// Accepts integers, floats or null; the server emits all of them for timestamps.
pub(crate) fn whole_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(match value {
        None => 0,
        Some(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|v| v as i64))
            .or_else(|| n.as_f64().map(|v| v as i64))
            .unwrap_or_default(),
    })
}

/// Treats `null` and `""` as absent.
fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
