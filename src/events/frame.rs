//! Server-sent event framing.
//!
//! Lines are terminated by `\n` or `\r\n`; a blank line dispatches the
//! accumulated frame. Lines starting with `:` are comments. Multiple `data:`
//! lines are joined with `\n`.

use crate::error::{Result, SyncError};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Longest line accepted before the stream is considered broken.
const MAX_LINE: usize = 8 * 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: Frame,
    has_data: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn field(&mut self, line: &[u8]) {
        if line.first() == Some(&b':') {
            return;
        }
        let line = String::from_utf8_lossy(line);
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        match name {
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
    }

    /// Frames without data are not dispatched.
    fn dispatch(&mut self) -> Option<Frame> {
        let frame = std::mem::take(&mut self.pending);
        let has_data = std::mem::replace(&mut self.has_data, false);
        has_data.then_some(frame)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = SyncError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE {
                    return Err(SyncError::Protocol(format!(
                        "event line longer than {} bytes",
                        MAX_LINE
                    )));
                }
                return Ok(None);
            };

            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    return Ok(Some(frame));
                }
                continue;
            }
            self.field(&line);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            let line = src.split();
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            self.field(line);
        }
        Ok(self.dispatch())
    }
}
