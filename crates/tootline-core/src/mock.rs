use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::client::{ApiClient, ApiResponse, ByteStream, FrameStream, Method, QueryParams};
use crate::errors::ApiError;

/// Pre-programmed REST response for deterministic tests without a server.
pub enum MockResponse {
    /// 200 with a JSON body and an optional `rel="next"` page path.
    Page { body: Value, next: Option<String> },
    Error(ApiError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn page(body: Value) -> Self {
        Self::Page { body, next: None }
    }

    pub fn page_with_next(body: Value, next: &str) -> Self {
        Self::Page {
            body,
            next: Some(next.to_string()),
        }
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Pre-programmed push connection.
pub enum MockStream<T> {
    /// Yield the items, then either end or stay open without data.
    Items { items: Vec<T>, hold_open: bool },
    /// Yield whatever the test sends; ends when the sender is dropped.
    Channel(UnboundedReceiver<T>),
    /// Fail the connect call itself.
    Fail(ApiError),
}

impl<T> MockStream<T> {
    pub fn items(items: Vec<T>) -> Self {
        Self::Items {
            items,
            hold_open: false,
        }
    }

    pub fn held_open(items: Vec<T>) -> Self {
        Self::Items {
            items,
            hold_open: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockCall {
    pub method: Method,
    pub path: String,
    pub params: QueryParams,
}

/// Scripted [`ApiClient`]. REST responses are queued per path (query string
/// ignored); an exhausted queue answers `200 []`. Push connections are taken
/// from one queue per wire encoding; an exhausted queue fails the connect.
#[derive(Default)]
pub struct MockApiClient {
    pages: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    event_streams: Mutex<VecDeque<MockStream<Bytes>>>,
    sockets: Mutex<VecDeque<MockStream<String>>>,
    calls: Mutex<Vec<MockCall>>,
    stream_params: Mutex<Vec<(String, QueryParams)>>,
    connect_attempts: Mutex<Vec<Instant>>,
    live_streams: Arc<AtomicUsize>,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, path: &str, response: MockResponse) {
        self.pages
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_page(&self, path: &str, body: Value) {
        self.push_response(path, MockResponse::page(body));
    }

    pub fn push_event_stream(&self, stream: MockStream<Bytes>) {
        self.event_streams.lock().push_back(stream);
    }

    pub fn push_socket(&self, socket: MockStream<String>) {
        self.sockets.lock().push_back(socket);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of REST calls made against `path`, query string ignored.
    pub fn request_count(&self, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| path_key(&call.path) == path)
            .count()
    }

    /// Path and parameters of every push connect attempt, in order.
    pub fn stream_requests(&self) -> Vec<(String, QueryParams)> {
        self.stream_params.lock().clone()
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.connect_attempts.lock().clone()
    }

    /// Push connections handed out and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    fn record_connect(&self, path: &str, params: &QueryParams) {
        self.connect_attempts.lock().push(Instant::now());
        self.stream_params
            .lock()
            .push((path.to_string(), params.clone()));
    }

    fn open<T: Send + 'static>(
        &self,
        scripted: Option<MockStream<T>>,
    ) -> Result<futures::stream::BoxStream<'static, Result<T, ApiError>>, ApiError> {
        let inner = match scripted {
            None => return Err(ApiError::Network("connection refused".into())),
            Some(MockStream::Fail(err)) => return Err(err),
            Some(MockStream::Items { items, hold_open }) => {
                let items = stream::iter(items.into_iter().map(Ok));
                if hold_open {
                    items.chain(stream::pending()).boxed()
                } else {
                    items.boxed()
                }
            }
            Some(MockStream::Channel(rx)) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (Ok(item), rx))
            })
            .boxed(),
        };

        self.live_streams.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live_streams.clone());
        Ok(inner
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn path_key(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

async fn resolve_response(response: MockResponse) -> Result<ApiResponse, ApiError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Page { body, next } => {
                let headers = next
                    .map(|next| {
                        vec![(
                            "link".to_string(),
                            format!(r#"<https://mock.example{next}>; rel="next""#),
                        )]
                    })
                    .unwrap_or_default();
                return Ok(ApiResponse {
                    status: 200,
                    headers,
                    body: Bytes::from(body.to_string()),
                });
            }
            MockResponse::Error(err) => return Err(err),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &QueryParams,
    ) -> Result<ApiResponse, ApiError> {
        self.calls.lock().push(MockCall {
            method,
            path: path.to_string(),
            params: params.clone(),
        });
        let scripted = self
            .pages
            .lock()
            .get_mut(path_key(path))
            .and_then(VecDeque::pop_front);
        resolve_response(scripted.unwrap_or_else(|| MockResponse::page(Value::Array(Vec::new()))))
            .await
    }

    async fn open_event_stream(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<ByteStream, ApiError> {
        self.record_connect(path, params);
        let scripted = self.event_streams.lock().pop_front();
        self.open(scripted)
    }

    async fn connect_socket(&self, params: &QueryParams) -> Result<FrameStream, ApiError> {
        self.record_connect("", params);
        let scripted = self.sockets.lock().pop_front();
        self.open(scripted)
    }
}

/// JSON builders for the entities the engine decodes.
pub mod fixtures {
    use serde_json::{json, Value};

    pub fn account_json(id: &str) -> Value {
        json!({
            "id": id,
            "username": "alice",
            "acct": "alice",
            "display_name": "Alice",
            "url": format!("https://mastodon.example/@alice{id}"),
            "bot": false,
            "followers_count": 12,
        })
    }

    pub fn status_json(id: &str) -> Value {
        json!({
            "id": id,
            "created_at": "2024-03-01T12:00:00.000Z",
            "account": account_json("1"),
            "content": format!("<p>status {id}</p>"),
            "spoiler_text": "",
            "sensitive": false,
            "visibility": "public",
            "url": format!("https://mastodon.example/@alice/{id}"),
            "in_reply_to_id": null,
            "reblog": null,
            "replies_count": 0,
            "reblogs_count": 0,
            "favourites_count": 0,
            "emojis": [],
        })
    }

    pub fn notification_json(id: &str, kind: &str) -> Value {
        json!({
            "id": id,
            "type": kind,
            "created_at": "2024-03-01T12:00:00.000Z",
            "account": account_json("2"),
            "status": status_json(&format!("9{id}")),
        })
    }

    /// A page of statuses in the order given (servers send newest first).
    pub fn status_page(ids: &[&str]) -> Value {
        Value::Array(ids.iter().map(|id| status_json(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::next_page;

    #[tokio::test]
    async fn scripted_pages_then_empty() {
        let mock = MockApiClient::new();
        mock.push_response(
            "/api/v1/timelines/home",
            MockResponse::page_with_next(fixtures::status_page(&["2"]), "/api/v1/timelines/home?max_id=2"),
        );

        let first = mock
            .request(Method::Get, "/api/v1/timelines/home", &QueryParams::new())
            .await
            .unwrap();
        assert_eq!(
            next_page(&first).as_deref(),
            Some("/api/v1/timelines/home?max_id=2")
        );

        let second = mock
            .request(Method::Get, "/api/v1/timelines/home?max_id=2", &QueryParams::new())
            .await
            .unwrap();
        let items: Vec<Value> = second.json().unwrap();
        assert!(items.is_empty());
        assert_eq!(mock.request_count("/api/v1/timelines/home"), 2);
    }

    #[tokio::test]
    async fn scripted_error_is_returned() {
        let mock = MockApiClient::new();
        mock.push_response(
            "/api/v1/notifications",
            MockResponse::Error(ApiError::from_status(503, b"")),
        );
        let err = mock
            .request(Method::Get, "/api/v1/notifications", &QueryParams::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn unscripted_stream_fails_to_connect() {
        let mock = MockApiClient::new();
        let result = mock.connect_socket(&QueryParams::new()).await;
        assert!(matches!(result, Err(ApiError::Network(_))));
        assert_eq!(mock.connect_attempts().len(), 1);
    }

    #[tokio::test]
    async fn live_stream_count_follows_drop() {
        let mock = MockApiClient::new();
        mock.push_event_stream(MockStream::held_open(vec![Bytes::from_static(b":hi\n")]));
        let mut stream = mock
            .open_event_stream("/api/v1/streaming/user", &QueryParams::new())
            .await
            .unwrap();
        assert_eq!(mock.live_streams(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b":hi\n"));
        drop(stream);
        assert_eq!(mock.live_streams(), 0);
    }
}
