use tootline_core::Topic;

/// Faults of the multiplexing layer. Connection faults never surface here;
/// transports contain them and reconnect.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no open stream for topic {0}")]
    UnknownTopic(Topic),
    #[error("unsupported streaming scheme: {0}")]
    UnknownScheme(String),
}

/// A single event that could not be decoded. Dropped and logged; the
/// connection carries on.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("expected an `event:` line, got {0:?}")]
    MissingEventLine(String),
    #[error("expected a `data:` line, got {0:?}")]
    UnexpectedLine(String),
    #[error("event `{0}` carries no data")]
    NoData(String),
    #[error("frame has no `{0}` string")]
    MissingKey(&'static str),
    #[error("invalid JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::Json(e.to_string())
    }
}
