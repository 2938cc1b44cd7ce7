//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section is `#[serde(default)]` so
//! a partial file only has to name what it changes.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Refresh interval used when streaming is on and no interval is configured.
pub const STREAMING_REFRESH_SECS: u64 = 120;

/// Largest page size Mastodon list endpoints accept.
pub const MAX_FETCH_LIMIT: u32 = 80;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub instance: InstanceSettings,
    pub timeline: TimelineSettings,
    pub stream: StreamSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceSettings {
    /// e.g. `https://mastodon.social`
    pub base_url: String,
    /// Push endpoint; discovered from the instance when unset.
    pub streaming_url: Option<String>,
    /// Bearer token. Read from the `accessToken` key or the environment and
    /// never written back out.
    #[serde(skip)]
    pub access_token: Option<SecretString>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://mastodon.social".to_string(),
            streaming_url: None,
            access_token: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimelineSettings {
    /// Periodic refresh interval in seconds; 0 disables it.
    pub refresh_secs: u64,
    pub streaming: bool,
    /// Page size for catch-up fetches.
    pub fetch_limit: u32,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            refresh_secs: 0,
            streaming: false,
            fetch_limit: 40,
        }
    }
}

impl TimelineSettings {
    /// Interval for periodic refresh. Streaming always keeps a slow poll
    /// running to catch what the push connection missed during reconnects.
    pub fn effective_refresh(&self) -> Option<Duration> {
        match (self.refresh_secs, self.streaming) {
            (0, true) => Some(Duration::from_secs(STREAMING_REFRESH_SECS)),
            (0, false) => None,
            (secs, _) => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Delay before reconnecting a dropped push connection.
    pub backoff_secs: u64,
    /// A push connection silent for this long is treated as dead.
    pub read_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            backoff_secs: 30,
            read_timeout_secs: 120,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl StreamSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Per-module overrides, e.g. `{"tootline_stream": "debug"}`.
    pub modules: BTreeMap<String, String>,
    pub json: bool,
    /// Log to this file instead of stderr.
    pub file: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            modules: BTreeMap::new(),
            json: false,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.instance.base_url, "https://mastodon.social");
        assert_eq!(settings.timeline.fetch_limit, 40);
        assert_eq!(settings.stream.backoff(), Duration::from_secs(30));
        assert_eq!(settings.stream.read_timeout(), Duration::from_secs(120));
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn streaming_forces_slow_refresh() {
        let mut timeline = TimelineSettings::default();
        assert_eq!(timeline.effective_refresh(), None);

        timeline.streaming = true;
        assert_eq!(timeline.effective_refresh(), Some(Duration::from_secs(120)));

        timeline.refresh_secs = 15;
        assert_eq!(timeline.effective_refresh(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"timeline": {"streaming": true}}"#).unwrap();
        assert!(settings.timeline.streaming);
        assert_eq!(settings.timeline.fetch_limit, 40);
        assert_eq!(settings.stream.backoff_secs, 30);
    }

    #[test]
    fn token_is_never_serialized() {
        let mut settings = Settings::default();
        settings.instance.access_token = Some(SecretString::from("secret"));
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}
