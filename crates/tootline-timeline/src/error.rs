use tootline_core::ApiError;
use tootline_stream::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("{feed} feed does not support {operation}")]
    Unsupported {
        feed: String,
        operation: &'static str,
    },
    #[error("invalid feed: {0}")]
    InvalidFeed(String),
}

impl From<serde_json::Error> for TimelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Api(ApiError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, TimelineError>;

/// How a call to [`crate::Timeline::update`] ended.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Another update was already running.
    Skipped,
    Completed { delivered: usize },
    Failed(TimelineError),
}

impl UpdateOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}
