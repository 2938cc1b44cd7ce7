use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tootline_core::{ApiClient, ApiError, RawEvent, Topic};

use crate::error::{FrameError, StreamError};
use crate::frames::{decode_socket_frame, Frame};
use crate::sse::SseDecoder;

/// Wire encoding of the push endpoint, chosen by its URL scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushScheme {
    /// `http(s)`: frame-per-line event stream.
    EventStream,
    /// `ws(s)`: one JSON message per socket frame.
    Socket,
}

impl PushScheme {
    pub fn from_url(url: &str) -> Result<Self, StreamError> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        match scheme.as_str() {
            "https" | "http" => Ok(Self::EventStream),
            "wss" | "ws" => Ok(Self::Socket),
            _ => Err(StreamError::UnknownScheme(url.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Streaming,
    Backoff,
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Wait between a dropped connection and the next attempt.
    pub backoff: Duration,
    /// Frame-per-line connections silent for this long are dropped.
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
        }
    }
}

/// Owns the upstream push connection of one topic. [`Transport::run`] keeps
/// it alive forever, reconnecting after a fixed backoff, and pushes decoded
/// events onto the queue handed out by [`Transport::new`].
pub struct Transport {
    topic: Topic,
    scheme: PushScheme,
    client: Arc<dyn ApiClient>,
    config: TransportConfig,
    queue: mpsc::UnboundedSender<RawEvent>,
    state: watch::Sender<TransportState>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Transport {
    pub fn new(
        topic: Topic,
        scheme: PushScheme,
        client: Arc<dyn ApiClient>,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(TransportState::Connecting);
        let transport = Self {
            topic,
            scheme,
            client,
            config,
            queue,
            state,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        };
        (transport, rx)
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop `run` and release the connection. Later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        debug!(topic = %self.topic, "transport closed");
    }

    /// Connect, stream, back off, repeat, until closed. Connection faults are
    /// logged here and never returned.
    pub async fn run(&self) {
        loop {
            self.set_state(TransportState::Connecting);
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                outcome = self.stream_once() => outcome,
            };
            match outcome {
                Ok(()) => info!(topic = %self.topic, "push connection ended"),
                Err(e) => warn!(
                    topic = %self.topic,
                    error = %e,
                    kind = e.error_kind(),
                    "push connection failed"
                ),
            }

            self.set_state(TransportState::Backoff);
            debug!(topic = %self.topic, backoff = ?self.config.backoff, "reconnecting after backoff");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.backoff) => {}
            }
        }
    }

    fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    async fn stream_once(&self) -> Result<(), ApiError> {
        match self.scheme {
            PushScheme::EventStream => self.read_event_stream().await,
            PushScheme::Socket => self.read_socket().await,
        }
    }

    async fn read_event_stream(&self) -> Result<(), ApiError> {
        let (path, params) = self.topic.event_stream_path();
        let mut body = self.client.open_event_stream(&path, &params).await?;
        self.set_state(TransportState::Streaming);
        info!(topic = %self.topic, "event stream connected");

        let mut decoder = SseDecoder::new();
        let mut decoded = Vec::new();
        loop {
            let chunk = match tokio::time::timeout(self.config.read_timeout, body.next()).await {
                Err(_) => return Err(ApiError::Timeout(self.config.read_timeout)),
                Ok(None) => return decoder.finish(),
                Ok(Some(chunk)) => chunk?,
            };
            let fed = decoder.feed(&chunk, &mut decoded);
            for event in decoded.drain(..) {
                self.deliver(event);
            }
            fed?;
        }
    }

    async fn read_socket(&self) -> Result<(), ApiError> {
        let mut frames = self.client.connect_socket(&self.topic.socket_params()).await?;
        self.set_state(TransportState::Streaming);
        info!(topic = %self.topic, "socket connected");

        while let Some(text) = frames.next().await {
            self.deliver(decode_socket_frame(&text?));
        }
        Ok(())
    }

    fn deliver(&self, decoded: Result<Frame, FrameError>) {
        match decoded {
            Ok(frame) => {
                let event = RawEvent {
                    topic: self.topic.clone(),
                    kind: frame.kind,
                    payload: frame.payload,
                };
                if self.queue.send(event).is_err() {
                    debug!(topic = %self.topic, "event queue gone, dropping event");
                }
            }
            Err(e) => warn!(topic = %self.topic, error = %e, "dropping malformed event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use tootline_core::mock::{MockApiClient, MockStream};
    use tootline_core::EventKind;

    fn spawn_transport(
        mock: &Arc<MockApiClient>,
        topic: Topic,
        scheme: PushScheme,
        config: TransportConfig,
    ) -> (Arc<Transport>, mpsc::UnboundedReceiver<RawEvent>) {
        let (transport, rx) = Transport::new(topic, scheme, mock.clone(), config);
        let transport = Arc::new(transport);
        let runner = transport.clone();
        tokio::spawn(async move { runner.run().await });
        (transport, rx)
    }

    #[test]
    fn scheme_from_url() {
        assert_eq!(
            PushScheme::from_url("https://mastodon.example").unwrap(),
            PushScheme::EventStream
        );
        assert_eq!(
            PushScheme::from_url("wss://streaming.mastodon.example").unwrap(),
            PushScheme::Socket
        );
        assert!(matches!(
            PushScheme::from_url("gopher://example"),
            Err(StreamError::UnknownScheme(_))
        ));
        assert!(PushScheme::from_url("mastodon.example").is_err());
    }

    #[tokio::test]
    async fn event_stream_delivers_one_event_per_block() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_event_stream(MockStream::held_open(vec![Bytes::from_static(
            b": keepalive\n\nevent:update\ndata:{\"id\":\"1\"}\n\n",
        )]));

        let (transport, mut rx) =
            spawn_transport(&mock, Topic::user(), PushScheme::EventStream, TransportConfig::default());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, Topic::user());
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.payload, json!({"id": "1"}));

        let mut state = transport.state();
        state
            .wait_for(|s| *s == TransportState::Streaming)
            .await
            .unwrap();
        assert_eq!(
            mock.stream_requests()[0].0,
            "/api/v1/streaming/user"
        );
        transport.close();
    }

    #[tokio::test]
    async fn malformed_event_does_not_reconnect() {
        let mock = Arc::new(MockApiClient::new());
        let (tx, rx_chunks) = mpsc::unbounded_channel();
        mock.push_event_stream(MockStream::Channel(rx_chunks));

        let (transport, mut rx) = spawn_transport(
            &mock,
            Topic::public_local(),
            PushScheme::EventStream,
            TransportConfig::default(),
        );
        tx.send(Bytes::from_static(b"event:update\ndata:{bad json}\n\n")).unwrap();
        tx.send(Bytes::from_static(b"event:update\ndata:{\"id\":\"2\"}\n\n")).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, json!({"id": "2"}));
        assert_eq!(mock.connect_attempts().len(), 1);
        assert_eq!(*transport.state().borrow(), TransportState::Streaming);
        transport.close();
    }

    #[tokio::test]
    async fn socket_frames_are_decoded_and_bad_ones_skipped() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_socket(MockStream::held_open(vec![
            r#"{"event":"notification"}"#.to_string(),
            r#"{"event":"notification","payload":"{\"id\":\"3\"}"}"#.to_string(),
        ]));

        let (transport, mut rx) = spawn_transport(
            &mock,
            Topic::user_notification(),
            PushScheme::Socket,
            TransportConfig::default(),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Notification);
        assert_eq!(event.payload, json!({"id": "3"}));
        assert_eq!(
            mock.stream_requests()[0].1.get("stream"),
            Some("user:notification")
        );
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_socket_reconnects_after_backoff() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_socket(MockStream::items(vec![
            r#"{"event":"update","payload":"{\"id\":\"1\"}"}"#.to_string(),
        ]));
        mock.push_socket(MockStream::held_open(vec![
            r#"{"event":"update","payload":"{\"id\":\"2\"}"}"#.to_string(),
        ]));
        let config = TransportConfig {
            backoff: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        };

        let (transport, mut rx) = spawn_transport(&mock, Topic::public(), PushScheme::Socket, config);
        assert_eq!(rx.recv().await.unwrap().payload, json!({"id": "1"}));
        assert_eq!(rx.recv().await.unwrap().payload, json!({"id": "2"}));

        let attempts = mock.connect_attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(10));
        assert_eq!(mock.stream_requests()[1].1.get("stream"), Some("public"));
        assert!(!transport.is_closed());
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_retry_after_fixed_backoff() {
        let mock = Arc::new(MockApiClient::new());
        let config = TransportConfig {
            backoff: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
        };
        let (transport, _rx) = spawn_transport(&mock, Topic::user(), PushScheme::EventStream, config);

        tokio::time::sleep(Duration::from_secs(30 * 4 + 1)).await;
        let attempts = mock.connect_attempts();
        assert_eq!(attempts.len(), 5);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(30));
        }
        assert!(!transport.is_closed());
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn eof_and_truncation_lead_to_reconnect() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_event_stream(MockStream::items(vec![Bytes::from_static(
            b"event:update\ndata:{\"id\":\"1\"}\n\n",
        )]));
        mock.push_event_stream(MockStream::items(vec![Bytes::from_static(b"event:upd")]));
        mock.push_event_stream(MockStream::held_open(vec![Bytes::from_static(
            b"event:update\ndata:{\"id\":\"2\"}\n\n",
        )]));

        let (transport, mut rx) = spawn_transport(
            &mock,
            Topic::user(),
            PushScheme::EventStream,
            TransportConfig::default(),
        );
        assert_eq!(rx.recv().await.unwrap().payload, json!({"id": "1"}));
        assert_eq!(rx.recv().await.unwrap().payload, json!({"id": "2"}));
        assert_eq!(mock.connect_attempts().len(), 3);
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_event_stream(MockStream::held_open(Vec::new()));
        let config = TransportConfig {
            backoff: Duration::from_secs(5),
            read_timeout: Duration::from_secs(60),
        };
        let (transport, _rx) = spawn_transport(&mock, Topic::user(), PushScheme::EventStream, config);

        tokio::time::sleep(Duration::from_secs(66)).await;
        let attempts = mock.connect_attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(65));
        transport.close();
    }

    #[tokio::test]
    async fn close_stops_run_and_is_idempotent() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_event_stream(MockStream::held_open(Vec::new()));
        let (transport, rx) =
            Transport::new(Topic::user(), PushScheme::EventStream, mock.clone(), TransportConfig::default());
        let transport = Arc::new(transport);
        let runner = transport.clone();
        let task = tokio::spawn(async move { runner.run().await });

        let mut state = transport.state();
        state
            .wait_for(|s| *s == TransportState::Streaming)
            .await
            .unwrap();
        assert_eq!(mock.live_streams(), 1);

        transport.close();
        transport.close();
        task.await.unwrap();
        assert!(transport.is_closed());
        assert_eq!(mock.live_streams(), 0);
        drop(rx);
    }
}
