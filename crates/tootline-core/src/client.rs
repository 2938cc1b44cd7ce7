use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::de::DeserializeOwned;

use crate::errors::ApiError;

/// Raw body chunks of a frame-per-line push connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// Text frames of a message-per-frame push connection. The stream ends when
/// the peer closes the socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered query parameters. Setting an existing key replaces its value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A complete, buffered response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ApiResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Authenticated access to one instance. Implementations carry their own
/// credentials; nothing in the engine reaches for global auth state.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue a request. `path` may already carry a query string (as the
    /// paths returned by pagination links do); `params` are appended.
    /// Non-2xx responses are returned as [`ApiError::Response`].
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &QueryParams,
    ) -> Result<ApiResponse, ApiError>;

    /// Open a long-lived frame-per-line push connection.
    async fn open_event_stream(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<ByteStream, ApiError>;

    /// Connect the message-per-frame push socket.
    async fn connect_socket(&self, params: &QueryParams) -> Result<FrameStream, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_existing_key() {
        let mut params = QueryParams::new().with("limit", 40).with("local", true);
        params.set("limit", 20);
        assert_eq!(params.get("limit"), Some("20"));
        assert_eq!(params.get("local"), Some("true"));
        assert_eq!(params.iter().count(), 2);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let resp = ApiResponse {
            status: 200,
            headers: vec![("link".into(), "<x>; rel=\"next\"".into())],
            body: Bytes::from_static(b"[]"),
        };
        assert_eq!(resp.header("Link"), Some("<x>; rel=\"next\""));
        assert!(resp.is_success());
        let items: Vec<serde_json::Value> = resp.json().unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn method_display() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }
}
