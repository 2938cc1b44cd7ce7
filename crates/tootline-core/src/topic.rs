use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::QueryParams;

/// Name of one upstream push feed. Two subscriptions with equal topics
/// share a single upstream connection.
///
/// Topics use the socket-protocol stream names (`user`, `public:local`, ...)
/// with the hashtag or list argument appended after a final colon, e.g.
/// `hashtag:rust` or `hashtag:local:rust`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub const USER: &'static str = "user";
    pub const USER_NOTIFICATION: &'static str = "user:notification";
    pub const PUBLIC: &'static str = "public";
    pub const PUBLIC_LOCAL: &'static str = "public:local";
    pub const PUBLIC_REMOTE: &'static str = "public:remote";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn user() -> Self {
        Self::new(Self::USER)
    }

    pub fn user_notification() -> Self {
        Self::new(Self::USER_NOTIFICATION)
    }

    pub fn public() -> Self {
        Self::new(Self::PUBLIC)
    }

    pub fn public_local() -> Self {
        Self::new(Self::PUBLIC_LOCAL)
    }

    pub fn public_remote() -> Self {
        Self::new(Self::PUBLIC_REMOTE)
    }

    pub fn hashtag(tag: &str, local: bool) -> Self {
        if local {
            Self(format!("hashtag:local:{tag}"))
        } else {
            Self(format!("hashtag:{tag}"))
        }
    }

    pub fn list(list_id: &str) -> Self {
        Self(format!("list:{list_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into the stream name and its argument, if any.
    fn parts(&self) -> (&str, Option<(&'static str, &str)>) {
        if let Some(tag) = self.0.strip_prefix("hashtag:local:") {
            return ("hashtag:local", Some(("tag", tag)));
        }
        if let Some(tag) = self.0.strip_prefix("hashtag:") {
            return ("hashtag", Some(("tag", tag)));
        }
        if let Some(list) = self.0.strip_prefix("list:") {
            return ("list", Some(("list", list)));
        }
        (&self.0, None)
    }

    /// Path and query for the frame-per-line protocol, e.g.
    /// `/api/v1/streaming/public/local` or `/api/v1/streaming/hashtag?tag=rust`.
    pub fn event_stream_path(&self) -> (String, QueryParams) {
        let (name, arg) = self.parts();
        let path = format!("/api/v1/streaming/{}", name.replace(':', "/"));
        let mut params = QueryParams::new();
        if let Some((key, value)) = arg {
            params.set(key, value);
        }
        (path, params)
    }

    /// Query parameters for the message-per-frame protocol.
    pub fn socket_params(&self) -> QueryParams {
        let (name, arg) = self.parts();
        let mut params = QueryParams::new().with("stream", name);
        if let Some((key, value)) = arg {
            params.set(key, value);
        }
        params
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
