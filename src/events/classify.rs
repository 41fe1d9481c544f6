//! Typed workspace events.
//!
//! Every message on the event stream is a JSON object carrying a `subject`.
//! The subject is read first from a minimal envelope; the full payload is then
//! decoded into the shape that subject implies.

use crate::api::types::whole_number;
use crate::api::{File, FileInfo, Record};
use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, warn};

const WORKSPACE_ADDED: &str = "P:WORKSPACE:ADDED";
const WORKSPACE_UPDATED: &str = "P:WORKSPACE:UPDATED";
const WORKSPACE_DELETED: &str = "P:WORKSPACE:DELETED";
const COMPILER_PREFIX: &str = "P:COMPILER:";
const PING: &str = "P:PING";

/// Kind of compiler output announced by a `P:COMPILER:*` event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Vhdl,
    CSim,
    Other(String),
}

impl ArtifactKind {
    fn from_name(name: &str) -> Self {
        match name {
            "VHDL" => ArtifactKind::Vhdl,
            "C" => ArtifactKind::CSim,
            other => ArtifactKind::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ArtifactKind::Vhdl => "VHDL",
            ArtifactKind::CSim => "C",
            ArtifactKind::Other(name) => name,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A message from the workspace event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WorkspaceAdded {
        timestamp: i64,
        files: Vec<File>,
    },
    WorkspaceUpdated {
        timestamp: i64,
        files: Vec<File>,
    },
    WorkspaceDeleted {
        timestamp: i64,
        file: File,
    },
    /// The compiler produced new output of `kind`.
    CompilerOutputReady {
        timestamp: i64,
        kind: ArtifactKind,
        outputs: Vec<FileInfo>,
    },
    Ping {
        timestamp: i64,
    },
    /// A subject this client does not know about.
    Unknown {
        timestamp: i64,
        subject: String,
    },
}

impl Event {
    pub fn subject(&self) -> Cow<'_, str> {
        match self {
            Event::WorkspaceAdded { .. } => Cow::Borrowed(WORKSPACE_ADDED),
            Event::WorkspaceUpdated { .. } => Cow::Borrowed(WORKSPACE_UPDATED),
            Event::WorkspaceDeleted { .. } => Cow::Borrowed(WORKSPACE_DELETED),
            Event::CompilerOutputReady { kind, .. } => {
                Cow::Owned(format!("{}{}", COMPILER_PREFIX, kind))
            }
            Event::Ping { .. } => Cow::Borrowed(PING),
            Event::Unknown { subject, .. } => Cow::Borrowed(subject),
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Event::WorkspaceAdded { timestamp, .. }
            | Event::WorkspaceUpdated { timestamp, .. }
            | Event::WorkspaceDeleted { timestamp, .. }
            | Event::CompilerOutputReady { timestamp, .. }
            | Event::Ping { timestamp }
            | Event::Unknown { timestamp, .. } => *timestamp,
        }
    }

    /// Records of the files this event is about.
    ///
    /// VHDL output is expected to be a single file; when the compiler reports
    /// more, only the first is returned.
    pub fn referenced_files(&self) -> Vec<Record> {
        match self {
            Event::WorkspaceAdded { files, .. } | Event::WorkspaceUpdated { files, .. } => {
                files.iter().map(|f| f.record.clone()).collect()
            }
            Event::WorkspaceDeleted { file, .. } => vec![file.record.clone()],
            Event::CompilerOutputReady {
                kind: ArtifactKind::Vhdl,
                outputs,
                ..
            } => {
                let mut records = outputs.iter().flat_map(|o| o.files.iter());
                let first = records.next().cloned();
                let extra = records.count();
                if extra > 0 {
                    warn!(
                        "VHDL output lists {} files, only the first is used",
                        extra + 1
                    );
                }
                first.into_iter().collect()
            }
            Event::CompilerOutputReady { outputs, .. } => outputs
                .iter()
                .flat_map(|o| o.files.iter().cloned())
                .collect(),
            Event::Ping { .. } | Event::Unknown { .. } => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(alias = "Subject")]
    subject: String,
    #[serde(rename = "msgType", alias = "MsgType", default)]
    msg_type: Option<String>,
    #[serde(
        rename = "timeStamp",
        alias = "TimeStamp",
        default,
        deserialize_with = "whole_number"
    )]
    timestamp: i64,
}

#[derive(Deserialize)]
struct Payload<T> {
    #[serde(alias = "Contents")]
    contents: Option<T>,
}

fn contents<T: DeserializeOwned + Default>(data: &[u8], subject: &str) -> Result<T> {
    let payload: Payload<T> =
        serde_json::from_slice(data).map_err(|e| SyncError::decode(subject, e))?;
    Ok(payload.contents.unwrap_or_default())
}

/// Decode one event message.
///
/// A malformed envelope or payload is a [`SyncError::Decode`]. An unknown
/// subject is not an error: it yields [`Event::Unknown`] after a warning, as
/// does a compiler subject other than VHDL or C whose contents are not a list
/// of outputs.
pub fn classify(data: &[u8]) -> Result<Event> {
    let envelope: Envelope =
        serde_json::from_slice(data).map_err(|e| SyncError::decode("event envelope", e))?;
    let Envelope {
        subject,
        msg_type,
        timestamp,
    } = envelope;
    debug!(%subject, msg_type = msg_type.as_deref().unwrap_or(""), timestamp, "event");

    let event = match subject.as_str() {
        WORKSPACE_ADDED => Event::WorkspaceAdded {
            timestamp,
            files: contents(data, &subject)?,
        },
        WORKSPACE_UPDATED => Event::WorkspaceUpdated {
            timestamp,
            files: contents(data, &subject)?,
        },
        WORKSPACE_DELETED => Event::WorkspaceDeleted {
            timestamp,
            file: contents(data, &subject)?,
        },
        PING => Event::Ping { timestamp },
        s => match s.strip_prefix(COMPILER_PREFIX) {
            Some(kind) if !kind.is_empty() => {
                let kind = ArtifactKind::from_name(kind);
                match contents(data, &subject) {
                    Ok(outputs) => Event::CompilerOutputReady {
                        timestamp,
                        kind,
                        outputs,
                    },
                    // Only VHDL and C payloads are known to carry output files.
                    Err(e) if matches!(kind, ArtifactKind::Other(_)) => {
                        warn!("ignoring {} event with unexpected contents: {}", subject, e);
                        Event::Unknown {
                            timestamp,
                            subject: subject.clone(),
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {
                warn!("ignoring event with unknown subject {:?}", subject);
                Event::Unknown {
                    timestamp,
                    subject: subject.clone(),
                }
            }
        },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;

    const VHDL_TWO_RECORDS: &str = r#"{
        "subject": "P:COMPILER:VHDL",
        "msgType": "VHDL",
        "timeStamp": 1387740467000,
        "contents": [{
            "created": 1387740467000,
            "problems": [],
            "files": [
                {"relPath": "src-gen/vhdl/Blinky.vhd", "fileURI": "/api/v0.1/workspace/1234/src-gen:vhdl:Blinky.vhd", "lastModified": 1},
                {"relPath": "src-gen/vhdl/Extra.vhd", "fileURI": "/api/v0.1/workspace/1234/src-gen:vhdl:Extra.vhd", "lastModified": 2}
            ]
        }]
    }"#;

    #[test]
    fn test_vhdl_event_references_first_record_only() {
        let event = classify(VHDL_TWO_RECORDS.as_bytes()).unwrap();
        assert_eq!(event.subject(), "P:COMPILER:VHDL");
        assert_eq!(event.timestamp(), 1387740467000);
        let files = event.referenced_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "src-gen/vhdl/Blinky.vhd");
    }

    #[test]
    fn test_c_event_references_all_records() {
        let json = VHDL_TWO_RECORDS.replace("P:COMPILER:VHDL", "P:COMPILER:C");
        let event = classify(json.as_bytes()).unwrap();
        assert!(matches!(
            event,
            Event::CompilerOutputReady {
                kind: ArtifactKind::CSim,
                ..
            }
        ));
        assert_eq!(event.referenced_files().len(), 2);
    }

    #[test]
    fn test_other_compiler_kind() {
        let event = classify(br#"{"subject":"P:COMPILER:VERILOG","contents":[]}"#).unwrap();
        assert_eq!(event.subject(), "P:COMPILER:VERILOG");
        assert!(event.referenced_files().is_empty());
    }

    #[test]
    fn test_workspace_events() {
        let updated = classify(
            br#"{"subject":"P:WORKSPACE:UPDATED","timeStamp":5,"contents":[
                {"record":{"relPath":"a.pshdl","fileURI":"/a"}},
                {"record":{"relPath":"b.pshdl","fileURI":"/b"}}]}"#,
        )
        .unwrap();
        let names: Vec<_> = updated
            .referenced_files()
            .into_iter()
            .map(|r| r.rel_path)
            .collect();
        assert_eq!(names, ["a.pshdl", "b.pshdl"]);

        let deleted = classify(
            br#"{"Subject":"P:WORKSPACE:DELETED","Contents":{"record":{"relPath":"a.pshdl"}}}"#,
        )
        .unwrap();
        assert_eq!(deleted.subject(), "P:WORKSPACE:DELETED");
        assert_eq!(deleted.referenced_files()[0].rel_path, "a.pshdl");
    }

    #[test]
    fn test_unknown_subject_is_not_an_error() {
        let event = classify(br#"{"subject":"P:SOMETHING:NEW","timeStamp":1}"#).unwrap();
        assert_eq!(
            event,
            Event::Unknown {
                timestamp: 1,
                subject: "P:SOMETHING:NEW".into()
            }
        );
        assert!(event.referenced_files().is_empty());
    }

    #[test]
    fn test_ping() {
        let event = classify(br#"{"subject":"P:PING","timeStamp":42}"#).unwrap();
        assert_eq!(event, Event::Ping { timestamp: 42 });
    }

    #[test]
    fn test_malformed_input_is_decode_error() {
        let err = classify(b"{not json").unwrap_err();
        assert_eq!(err.class(), FailureClass::Decode);

        let err = classify(br#"{"timeStamp":1}"#).unwrap_err();
        assert_eq!(err.class(), FailureClass::Decode);

        let err = classify(br#"{"subject":"P:WORKSPACE:UPDATED","contents":"nope"}"#).unwrap_err();
        assert_eq!(err.class(), FailureClass::Decode);
    }

    #[test]
    fn test_unfamiliar_compiler_payload_is_unknown() {
        let event = classify(br#"{"subject":"P:COMPILER:PSEX","timeStamp":7,"contents":{"module":"x"}}"#)
            .unwrap();
        assert_eq!(
            event,
            Event::Unknown {
                timestamp: 7,
                subject: "P:COMPILER:PSEX".to_string(),
            }
        );

        let err = classify(br#"{"subject":"P:COMPILER:VHDL","contents":{"module":"x"}}"#).unwrap_err();
        assert_eq!(err.class(), FailureClass::Decode);
        let err = classify(br#"{"subject":"P:COMPILER:C","contents":{"module":"x"}}"#).unwrap_err();
        assert_eq!(err.class(), FailureClass::Decode);
    }
}
