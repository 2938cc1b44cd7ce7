use serde_json::Value;

use tootline_core::EventKind;

use crate::error::FrameError;

/// One decoded push event, before it is tagged with its topic.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub kind: EventKind,
    pub payload: Value,
}

/// Decode one text frame of the push socket:
/// `{"event": "<kind>", "payload": "<json-encoded string>"}`.
pub fn decode_socket_frame(text: &str) -> Result<Frame, FrameError> {
    let frame: Value = serde_json::from_str(text)?;
    let kind = frame
        .get("event")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingKey("event"))?;
    let payload = frame
        .get("payload")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingKey("payload"))?;
    Ok(Frame {
        kind: EventKind::parse(kind),
        payload: serde_json::from_str(payload)?,
    })
}
