use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tootline_core::{ApiClient, RawEvent, Topic};

use crate::error::StreamError;
use crate::transport::{PushScheme, Transport, TransportConfig, TransportState};

pub type SubscriberId = u64;

/// Delivery queues of the current subscribers of one topic.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    next_id: SubscriberId,
    queues: HashMap<SubscriberId, mpsc::UnboundedSender<RawEvent>>,
}

impl SubscriberSet {
    /// Register a new subscriber and hand back its queue.
    pub fn add_subscriber(&mut self) -> (SubscriberId, mpsc::UnboundedReceiver<RawEvent>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(id, tx);
        (id, rx)
    }

    pub fn remove_subscriber(&mut self, id: SubscriberId) -> bool {
        self.queues.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    fn broadcast(&self, event: &RawEvent) {
        for (id, queue) in &self.queues {
            if queue.send(event.clone()).is_err() {
                debug!(subscriber = id, topic = %event.topic, "subscriber queue closed, skipping");
            }
        }
    }
}

/// One upstream connection and everyone listening to it.
pub struct TopicInstance {
    topic: Topic,
    transport: Arc<Transport>,
    subscribers: Arc<Mutex<SubscriberSet>>,
    run_task: JoinHandle<()>,
    fanout_task: JoinHandle<()>,
}

impl TopicInstance {
    /// Start the transport and the fan-out loop for `topic`. Must be called
    /// from within a tokio runtime.
    pub fn open(
        topic: Topic,
        streaming_url: &str,
        client: Arc<dyn ApiClient>,
        config: TransportConfig,
    ) -> Result<Self, StreamError> {
        let scheme = PushScheme::from_url(streaming_url)?;
        let (transport, queue) = Transport::new(topic.clone(), scheme, client, config);
        let transport = Arc::new(transport);
        let subscribers = Arc::new(Mutex::new(SubscriberSet::default()));

        let runner = transport.clone();
        let run_task = tokio::spawn(async move { runner.run().await });
        let fanout_task = tokio::spawn(fan_out(queue, subscribers.clone()));
        debug!(topic = %topic, ?scheme, "topic instance opened");

        Ok(Self {
            topic,
            transport,
            subscribers,
            run_task,
            fanout_task,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn transport_state(&self) -> watch::Receiver<TransportState> {
        self.transport.state()
    }

    pub async fn lock(&self) -> MutexGuard<'_, SubscriberSet> {
        self.subscribers.lock().await
    }

    /// Tear down the fan-out loop and the transport. Takes the held
    /// subscriber lock; the set must be empty.
    pub fn close(&self, subscribers: MutexGuard<'_, SubscriberSet>) {
        if !subscribers.is_empty() {
            warn!(
                topic = %self.topic,
                remaining = subscribers.len(),
                "closing topic instance with live subscribers"
            );
        }
        debug_assert!(subscribers.is_empty());
        self.fanout_task.abort();
        self.run_task.abort();
        self.transport.close();
        debug!(topic = %self.topic, "topic instance closed");
    }
}

impl Drop for TopicInstance {
    fn drop(&mut self) {
        self.fanout_task.abort();
        self.run_task.abort();
        self.transport.close();
    }
}

async fn fan_out(mut queue: mpsc::UnboundedReceiver<RawEvent>, subscribers: Arc<Mutex<SubscriberSet>>) {
    while let Some(event) = queue.recv().await {
        subscribers.lock().await.broadcast(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tootline_core::mock::{MockApiClient, MockStream};

    #[test]
    fn subscriber_ids_are_unique() {
        let mut set = SubscriberSet::default();
        let (a, _rx_a) = set.add_subscriber();
        let (b, _rx_b) = set.add_subscriber();
        assert_ne!(a, b);
        assert_eq!(set.len(), 2);
        assert!(set.remove_subscriber(a));
        assert!(!set.remove_subscriber(a));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber_in_order() {
        let mock = Arc::new(MockApiClient::new());
        let (tx, chunks) = mpsc::unbounded_channel();
        mock.push_event_stream(MockStream::Channel(chunks));

        let instance = TopicInstance::open(
            Topic::public(),
            "https://mastodon.example",
            mock.clone(),
            TransportConfig::default(),
        )
        .unwrap();
        let (mut rx_a, mut rx_b) = {
            let mut set = instance.lock().await;
            (set.add_subscriber().1, set.add_subscriber().1)
        };

        tx.send(Bytes::from_static(
            b"event:update\ndata:{\"id\":\"1\"}\n\nevent:delete\ndata:\"1\"\n\n",
        ))
        .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap().payload, serde_json::json!({"id": "1"}));
            assert_eq!(rx.recv().await.unwrap().payload, serde_json::json!("1"));
        }
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_block_others() {
        let mock = Arc::new(MockApiClient::new());
        let (tx, chunks) = mpsc::unbounded_channel();
        mock.push_event_stream(MockStream::Channel(chunks));

        let instance = TopicInstance::open(
            Topic::user(),
            "http://localhost:4000",
            mock.clone(),
            TransportConfig::default(),
        )
        .unwrap();
        let mut live = {
            let mut set = instance.lock().await;
            drop(set.add_subscriber().1);
            set.add_subscriber().1
        };

        tx.send(Bytes::from_static(b"event:update\ndata:{}\n\n")).unwrap();
        assert!(live.recv().await.is_some());
    }

    #[tokio::test]
    async fn unknown_scheme_fails_construction() {
        let mock = Arc::new(MockApiClient::new());
        let result = TopicInstance::open(
            Topic::user(),
            "ftp://mastodon.example",
            mock,
            TransportConfig::default(),
        );
        assert!(matches!(result, Err(StreamError::UnknownScheme(_))));
    }

    #[tokio::test]
    async fn close_stops_transport() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_socket(MockStream::held_open(Vec::new()));
        let instance = TopicInstance::open(
            Topic::user(),
            "wss://streaming.mastodon.example",
            mock.clone(),
            TransportConfig::default(),
        )
        .unwrap();
        let mut state = instance.transport_state();
        state
            .wait_for(|s| *s == TransportState::Streaming)
            .await
            .unwrap();

        let guard = instance.lock().await;
        instance.close(guard);
        assert!(instance.transport().is_closed());
    }
}
