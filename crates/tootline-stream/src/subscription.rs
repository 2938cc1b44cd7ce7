use tokio::sync::mpsc;
use tracing::warn;

use tootline_core::{RawEvent, Topic};

use crate::error::StreamError;
use crate::multiplexer::Multiplexer;
use crate::topic_instance::SubscriberId;

/// A consumer's handle on one topic. Events arrive in the order the
/// upstream connection produced them.
///
/// Release it with [`Subscription::close`]. A subscription dropped without
/// closing releases itself on the current runtime.
pub struct Subscription {
    topic: Topic,
    id: SubscriberId,
    queue: mpsc::UnboundedReceiver<RawEvent>,
    mux: Option<Multiplexer>,
}

impl Subscription {
    pub(crate) fn new(
        topic: Topic,
        id: SubscriberId,
        queue: mpsc::UnboundedReceiver<RawEvent>,
        mux: Multiplexer,
    ) -> Self {
        Self {
            topic,
            id,
            queue,
            mux: Some(mux),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next event. `None` once the topic has been torn down.
    pub async fn get(&mut self) -> Option<RawEvent> {
        self.queue.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_get(&mut self) -> Option<RawEvent> {
        self.queue.try_recv().ok()
    }

    pub async fn close(mut self) -> Result<(), StreamError> {
        match self.mux.take() {
            Some(mux) => mux.close_stream(&self.topic, self.id).await,
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(mux) = self.mux.take() else {
            return;
        };
        let topic = self.topic.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = mux.close_stream(&topic, id).await {
                        warn!(topic = %topic, error = %e, "failed to release dropped subscription");
                    }
                });
            }
            Err(_) => warn!(topic = %topic, "subscription dropped outside a runtime, not released"),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
