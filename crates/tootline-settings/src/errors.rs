//! Failures while reading `settings.json` or checking the merged result.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The merged document does not deserialize into [`crate::Settings`].
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// `key` is the camelCase path in the file, e.g. `timeline.fetchLimit`.
    #[error("invalid setting {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;
