use std::time::Duration;

use serde::Deserialize;

/// Typed error hierarchy for calls against the instance API.
/// Connection-scoped failures (network, timeout, interrupted streams) are
/// distinguished from responses the server actually sent.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{}", response_message(.status, .error, .description))]
    Response {
        status: u16,
        error: Option<String>,
        description: Option<String>,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Mastodon error entity: `{"error": "...", "error_description": "..."}`.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

fn response_message(status: &u16, error: &Option<String>, description: &Option<String>) -> String {
    let mut msg = format!("HTTP {status}");
    if let Some(error) = error {
        msg.push_str(&format!(". Error: {error}"));
    }
    if let Some(description) = description {
        msg.push_str(&format!(". Description: {description}"));
    }
    msg
}

impl ApiError {
    /// Build a response error from a non-2xx status, pulling `error` and
    /// `error_description` out of the body when it is a Mastodon error entity.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let (error, description) = match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => (parsed.error, parsed.error_description),
            Err(_) => (None, None),
        };
        Self::Response {
            status,
            error,
            description,
        }
    }

    /// Whether this failure belongs to the connection rather than to a
    /// response the server produced.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::StreamInterrupted(_) | Self::Socket(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Socket(_) => "socket",
            Self::Decode(_) => "decode",
            Self::InvalidUrl(_) => "invalid_url",
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_reads_mastodon_error_body() {
        let err = ApiError::from_status(
            404,
            br#"{"error":"Record not found","error_description":"gone"}"#,
        );
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            err.to_string(),
            "HTTP 404. Error: Record not found. Description: gone"
        );
    }

    #[test]
    fn from_status_tolerates_non_json_body() {
        let err = ApiError::from_status(502, b"<html>bad gateway</html>");
        assert_eq!(err.to_string(), "HTTP 502");
    }

    #[test]
    fn connection_fault_classification() {
        assert!(ApiError::Network("reset".into()).is_connection_fault());
        assert!(ApiError::Timeout(Duration::from_secs(10)).is_connection_fault());
        assert!(ApiError::StreamInterrupted("eof".into()).is_connection_fault());
        assert!(ApiError::Socket("closed".into()).is_connection_fault());
        assert!(!ApiError::from_status(500, b"").is_connection_fault());
        assert!(!ApiError::Decode("bad".into()).is_connection_fault());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ApiError::Network("x".into()).error_kind(), "network");
        assert_eq!(ApiError::from_status(401, b"").error_kind(), "response");
        assert_eq!(
            ApiError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn json_error_converts_to_decode() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: ApiError = json_err.into();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
