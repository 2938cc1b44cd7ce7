use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use tootline_core::{ApiClient, Topic};

use crate::error::StreamError;
use crate::subscription::Subscription;
use crate::topic_instance::{SubscriberId, TopicInstance};
use crate::transport::{Transport, TransportConfig, TransportState};

/// Shares one upstream connection per topic among any number of
/// subscriptions. The connection opens with the first subscription and
/// closes with the last.
///
/// Lock order: the topic map first, then a topic's subscriber set.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn ApiClient>,
    streaming_url: String,
    config: TransportConfig,
    topics: Mutex<HashMap<Topic, TopicInstance>>,
}

impl Multiplexer {
    pub fn new(
        client: Arc<dyn ApiClient>,
        streaming_url: impl Into<String>,
        config: TransportConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                streaming_url: streaming_url.into(),
                config,
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a subscription on `topic`, connecting upstream if this is the
    /// topic's first subscriber.
    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription, StreamError> {
        let mut topics = self.inner.topics.lock().await;
        if !topics.contains_key(&topic) {
            let instance = TopicInstance::open(
                topic.clone(),
                &self.inner.streaming_url,
                self.inner.client.clone(),
                self.inner.config.clone(),
            )?;
            info!(topic = %topic, "opened push stream");
            topics.insert(topic.clone(), instance);
        }
        let instance = topics
            .get(&topic)
            .ok_or_else(|| StreamError::UnknownTopic(topic.clone()))?;

        let (id, queue) = instance.lock().await.add_subscriber();
        debug!(topic = %topic, subscriber = id, "subscribed");
        Ok(Subscription::new(topic, id, queue, self.clone()))
    }

    /// Release one subscriber, closing the topic's connection if it was the
    /// last one.
    pub async fn close_stream(&self, topic: &Topic, id: SubscriberId) -> Result<(), StreamError> {
        let mut topics = self.inner.topics.lock().await;
        let instance = topics
            .get(topic)
            .ok_or_else(|| StreamError::UnknownTopic(topic.clone()))?;

        let mut subscribers = instance.lock().await;
        subscribers.remove_subscriber(id);
        debug!(topic = %topic, subscriber = id, remaining = subscribers.len(), "unsubscribed");
        if subscribers.is_empty() {
            instance.close(subscribers);
            topics.remove(topic);
            info!(topic = %topic, "closed push stream");
        }
        Ok(())
    }

    /// Number of topics with an open upstream connection.
    pub async fn topic_count(&self) -> usize {
        self.inner.topics.lock().await.len()
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        let topics = self.inner.topics.lock().await;
        match topics.get(topic) {
            Some(instance) => instance.lock().await.len(),
            None => 0,
        }
    }

    pub async fn transport_state(&self, topic: &Topic) -> Option<watch::Receiver<TransportState>> {
        let topics = self.inner.topics.lock().await;
        topics.get(topic).map(TopicInstance::transport_state)
    }

    pub(crate) async fn transport(&self, topic: &Topic) -> Option<Arc<Transport>> {
        let topics = self.inner.topics.lock().await;
        topics.get(topic).map(|instance| instance.transport().clone())
    }
}
