//! Line-oriented decoder for the frame-per-line push protocol.
//!
//! ```text
//! :thump
//!
//! event: update
//! data: {"id":"1", ...}
//!
//! ```
//!
//! Comment lines are keepalives and only skipped between events. A blank
//! line closes the buffered event, which must open with `event:` and continue
//! with one or more `data:` lines whose fragments are joined with `\n`.

use tootline_core::{ApiError, EventKind};

use crate::error::FrameError;
use crate::frames::Frame;

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of a line whose terminating `\n` has not arrived yet.
    partial: Vec<u8>,
    /// Lines of the event being assembled.
    lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body. Every event completed by the chunk
    /// is appended to `out`, malformed ones as `Err`. A line that is not
    /// UTF-8 fails the connection; events completed before it are still in
    /// `out`.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<Result<Frame, FrameError>>,
    ) -> Result<(), ApiError> {
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            self.partial.extend_from_slice(&rest[..newline]);
            rest = &rest[newline + 1..];

            let mut raw = std::mem::take(&mut self.partial);
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            let line = String::from_utf8(raw).map_err(|_| {
                ApiError::StreamInterrupted("event stream line is not valid UTF-8".to_string())
            })?;
            if let Some(event) = self.push_line(line) {
                out.push(event);
            }
        }
        self.partial.extend_from_slice(rest);
        Ok(())
    }

    /// Called at end of body. A trailing line without its newline means the
    /// read was cut short.
    pub fn finish(&mut self) -> Result<(), ApiError> {
        self.lines.clear();
        if self.partial.is_empty() {
            return Ok(());
        }
        let dangling = self.partial.len();
        self.partial.clear();
        Err(ApiError::StreamInterrupted(format!(
            "event stream ended mid-line ({dangling} bytes)"
        )))
    }

    fn push_line(&mut self, line: String) -> Option<Result<Frame, FrameError>> {
        if line.is_empty() {
            if self.lines.is_empty() {
                return None;
            }
            let lines = std::mem::take(&mut self.lines);
            return Some(decode_event(&lines));
        }
        if line.starts_with(':') && self.lines.is_empty() {
            return None;
        }
        self.lines.push(line);
        None
    }
}

fn decode_event(lines: &[String]) -> Result<Frame, FrameError> {
    let (first, data_lines) = lines
        .split_first()
        .ok_or_else(|| FrameError::MissingEventLine(String::new()))?;
    let kind = first
        .strip_prefix("event:")
        .ok_or_else(|| FrameError::MissingEventLine(first.clone()))?
        .trim();

    let mut fragments = Vec::with_capacity(data_lines.len());
    for line in data_lines {
        let fragment = line
            .strip_prefix("data:")
            .ok_or_else(|| FrameError::UnexpectedLine(line.clone()))?;
        fragments.push(fragment);
    }
    if fragments.is_empty() {
        return Err(FrameError::NoData(kind.to_string()));
    }

    Ok(Frame {
        kind: EventKind::parse(kind),
        payload: serde_json::from_str(&fragments.join("\n"))?,
    })
}
