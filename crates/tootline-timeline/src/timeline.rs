use std::collections::HashSet;
use std::iter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tootline_core::entities::{Status, StatusContext};
use tootline_core::ids::is_newer_id;
use tootline_core::{ApiClient, DomainEvent, EventId, Method, QueryParams, RawEvent};
use tootline_stream::{Multiplexer, Subscription};

use crate::error::{Result, TimelineError, UpdateOutcome};
use crate::feed::{FeedSource, FeedSpec};
use crate::pages::{fetch_pages, DEFAULT_LIMIT};

/// Capacity of the outbound queue. Producers wait when it is full.
pub const QUEUE_CAPACITY: usize = 128;

const NOTICE_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub struct TimelineOptions {
    /// Page size for fetches and updates.
    pub limit: u32,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Status messages for whoever is showing the feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimelineNotice {
    UpdateFailed { feed: String, error: String },
    StreamingStarted { feed: String },
    StreamingStopped { feed: String },
}

/// Poll cursor and the identifiers already handed to the consumer.
#[derive(Debug, Default)]
struct Cursor {
    most_recent_id: Option<String>,
    seen: HashSet<EventId>,
}

impl Cursor {
    /// Move the cursor to `id` unless that would move it backwards.
    fn advance(&mut self, id: &str) {
        match &self.most_recent_id {
            Some(current) if !is_newer_id(id, current) => {
                trace!(current = %current, candidate = id, "cursor not advanced");
            }
            _ => self.most_recent_id = Some(id.to_string()),
        }
    }
}

/// Holds the update flag for one in-flight update and clears it on drop,
/// including when the update future is cancelled.
struct UpdateFlight<'a>(&'a AtomicBool);

impl<'a> UpdateFlight<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for UpdateFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    feed: FeedSpec,
    client: Arc<dyn ApiClient>,
    limit: u32,
    cursor: Mutex<Cursor>,
    outbound: mpsc::Sender<DomainEvent>,
    inbound: Mutex<mpsc::Receiver<DomainEvent>>,
    updating: AtomicBool,
    notices: broadcast::Sender<TimelineNotice>,
}

struct StreamingTask {
    cancel: CancellationToken,
    handle: JoinHandle<Subscription>,
}

/// A live feed. Catch-up fetches and pushed events land in one outbound
/// queue, oldest first within each delivery, without repeats.
pub struct Timeline {
    inner: Arc<Inner>,
    mux: Option<Multiplexer>,
    cancel: CancellationToken,
    streaming: Mutex<Option<StreamingTask>>,
    refresh: parking_lot::Mutex<Option<JoinHandle<()>>>,
    updates: parking_lot::Mutex<Vec<AbortHandle>>,
}

impl Timeline {
    /// `mux` may be `None` for a feed that will never stream.
    pub fn new(
        feed: FeedSpec,
        client: Arc<dyn ApiClient>,
        mux: Option<Multiplexer>,
        options: TimelineOptions,
    ) -> Self {
        let (outbound, inbound) = mpsc::channel(QUEUE_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                feed,
                client,
                limit: options.limit,
                cursor: Mutex::new(Cursor::default()),
                outbound,
                inbound: Mutex::new(inbound),
                updating: AtomicBool::new(false),
                notices,
            }),
            mux,
            cancel: CancellationToken::new(),
            streaming: Mutex::new(None),
            refresh: parking_lot::Mutex::new(None),
            updates: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn feed(&self) -> &FeedSpec {
        &self.inner.feed
    }

    pub fn notices(&self) -> broadcast::Receiver<TimelineNotice> {
        self.inner.notices.subscribe()
    }

    /// Newest id seen by polling, sent as `since_id` by the next update.
    pub async fn most_recent_id(&self) -> Option<String> {
        self.inner.cursor.lock().await.most_recent_id.clone()
    }

    /// Load history page by page, newest page first. Each batch is yielded
    /// whole, oldest first; only the events the consumer has not seen are
    /// pushed to the outbound queue. Nothing is requested until the stream
    /// is polled, and every call starts again from the newest page.
    pub fn fetch(&self, limit: Option<u32>) -> BoxStream<'static, Result<Vec<DomainEvent>>> {
        let inner = self.inner.clone();
        let source = inner.feed.source().clone();
        match source {
            FeedSource::Thread(status) => {
                stream::once(async move { inner.fetch_thread(&status).await }).boxed()
            }
            FeedSource::Statuses { path, params } | FeedSource::Notifications { path, params } => {
                let limit = limit.unwrap_or(inner.limit);
                let pages = fetch_pages(inner.client.clone(), path, params, limit, None);
                let mut first = true;
                pages
                    .and_then(move |items| {
                        let inner = inner.clone();
                        let first = std::mem::replace(&mut first, false);
                        async move { inner.deliver_page(items, first).await }
                    })
                    .boxed()
            }
        }
    }

    /// Fetch everything newer than the cursor and deliver what the
    /// consumer has not seen. Returns [`UpdateOutcome::Skipped`] when an
    /// update is already running.
    pub async fn update(&self) -> Result<UpdateOutcome> {
        self.require_update("update")?;
        Ok(self.inner.update().await)
    }

    /// Run [`Timeline::update`] in the background. [`Timeline::close`]
    /// aborts it if it is still running.
    pub fn spawn_update(&self) -> Result<JoinHandle<UpdateOutcome>> {
        self.require_update("update")?;
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.update().await });
        let mut updates = self.updates.lock();
        updates.retain(|update| !update.is_finished());
        updates.push(handle.abort_handle());
        Ok(handle)
    }

    /// Start or stop consuming the feed's push topic. Enabling twice or
    /// disabling when not streaming does nothing.
    pub async fn streaming(&self, enable: bool) -> Result<()> {
        let mut slot = self.streaming.lock().await;
        if !enable {
            if let Some(task) = slot.take() {
                self.stop_streaming(task).await?;
            }
            return Ok(());
        }
        if slot.is_some() {
            return Ok(());
        }

        let (Some(topic), Some(mux)) = (self.inner.feed.topic(), self.mux.as_ref()) else {
            return Err(self.inner.unsupported("streaming"));
        };
        let subscription = mux.subscribe(topic.clone()).await?;
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(self.inner.clone().consume(subscription, cancel.clone()));
        *slot = Some(StreamingTask { cancel, handle });

        info!(feed = self.inner.feed.name(), topic = %topic, "streaming enabled");
        self.inner.notify(TimelineNotice::StreamingStarted {
            feed: self.inner.feed.name().to_string(),
        });
        Ok(())
    }

    pub async fn is_streaming(&self) -> bool {
        self.streaming.lock().await.is_some()
    }

    /// Call [`Timeline::update`] every `interval` until the timeline is
    /// closed. Replaces any earlier schedule.
    pub fn periodic_refresh(&self, interval: Duration) -> Result<()> {
        self.require_update("periodic refresh")?;
        let inner = self.inner.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = inner.update() => {
                        debug!(feed = inner.feed.name(), ?outcome, "periodic refresh");
                    }
                }
            }
        });
        debug!(feed = self.inner.feed.name(), ?interval, "periodic refresh scheduled");
        if let Some(previous) = self.refresh.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Everything queued right now, oldest first. Never waits: while a
    /// [`Timeline::get_events_wait`] call holds the queue this returns empty,
    /// since that call will hand over whatever arrives.
    pub async fn get_events(&self) -> Vec<DomainEvent> {
        match self.inner.inbound.try_lock() {
            Ok(mut inbound) => drain(&mut inbound, Vec::new()),
            Err(_) => {
                trace!(feed = self.inner.feed.name(), "queue held by a waiting reader");
                Vec::new()
            }
        }
    }

    /// Wait for at least one event, then drain the queue.
    pub async fn get_events_wait(&self) -> Vec<DomainEvent> {
        let mut inbound = self.inner.inbound.lock().await;
        match inbound.recv().await {
            Some(first) => drain(&mut inbound, vec![first]),
            None => Vec::new(),
        }
    }

    /// Stop refreshing, spawned updates and streaming, and release the
    /// subscription.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.abort_background();
        let task = self.streaming.lock().await.take();
        if let Some(task) = task {
            self.stop_streaming(task).await?;
        }
        info!(feed = self.inner.feed.name(), "timeline closed");
        Ok(())
    }

    async fn stop_streaming(&self, task: StreamingTask) -> Result<()> {
        task.cancel.cancel();
        match task.handle.await {
            Ok(subscription) => subscription.close().await?,
            Err(e) => warn!(feed = self.inner.feed.name(), error = %e, "stream consumer task failed"),
        }
        info!(feed = self.inner.feed.name(), "streaming disabled");
        self.inner.notify(TimelineNotice::StreamingStopped {
            feed: self.inner.feed.name().to_string(),
        });
        Ok(())
    }

    fn abort_background(&self) {
        if let Some(refresh) = self.refresh.lock().take() {
            refresh.abort();
        }
        for update in self.updates.lock().drain(..) {
            update.abort();
        }
    }

    fn require_update(&self, operation: &'static str) -> Result<()> {
        if self.inner.feed.can_update() {
            Ok(())
        } else {
            Err(self.inner.unsupported(operation))
        }
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.abort_background();
    }
}

impl Inner {
    fn unsupported(&self, operation: &'static str) -> TimelineError {
        TimelineError::Unsupported {
            feed: self.feed.name().to_string(),
            operation,
        }
    }

    fn notify(&self, notice: TimelineNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    async fn push(&self, event: DomainEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(feed = self.feed.name(), "outbound queue closed");
        }
    }

    /// One fetched page, newest first.
    async fn deliver_page(
        &self,
        items: Vec<serde_json::Value>,
        first: bool,
    ) -> Result<Vec<DomainEvent>> {
        let mut events = self.feed.decode_page(items)?;
        let newest = events.first().map(|e| e.server_id().to_string());
        events.reverse();
        self.deliver_fetched(events, first, newest.filter(|_| first))
            .await
    }

    async fn fetch_thread(&self, status: &Status) -> Result<Vec<DomainEvent>> {
        let path = format!("/api/v1/statuses/{}/context", status.original().id);
        let response = self
            .client
            .request(Method::Get, &path, &QueryParams::new())
            .await?;
        let context: StatusContext = response.json()?;
        let events = context
            .ancestors
            .into_iter()
            .chain(iter::once(status.clone()))
            .chain(context.descendants)
            .map(DomainEvent::from_status)
            .collect();
        self.deliver_fetched(events, true, None).await
    }

    /// Push the events of one fetched batch that the consumer has not seen
    /// and return the whole batch. The first batch of a fetch starts a new
    /// seen window.
    async fn deliver_fetched(
        &self,
        chronological: Vec<DomainEvent>,
        first: bool,
        newest: Option<String>,
    ) -> Result<Vec<DomainEvent>> {
        let fresh: Vec<DomainEvent> = {
            let mut cursor = self.cursor.lock().await;
            if let Some(newest) = &newest {
                cursor.advance(newest);
            }
            let previous = if first {
                std::mem::take(&mut cursor.seen)
            } else {
                HashSet::new()
            };
            chronological
                .iter()
                .filter(|event| {
                    let id = event.id();
                    !previous.contains(id) && cursor.seen.insert(id.clone())
                })
                .cloned()
                .collect()
        };

        for event in fresh {
            self.push(event).await;
        }
        Ok(chronological)
    }

    async fn update(&self) -> UpdateOutcome {
        let Some(_flight) = UpdateFlight::begin(&self.updating) else {
            debug!(feed = self.feed.name(), "update already running, skipped");
            return UpdateOutcome::Skipped;
        };
        match self.catch_up().await {
            Ok(delivered) => {
                debug!(feed = self.feed.name(), delivered, "update complete");
                UpdateOutcome::Completed { delivered }
            }
            Err(e) => {
                warn!(feed = self.feed.name(), error = %e, "update failed");
                self.notify(TimelineNotice::UpdateFailed {
                    feed: self.feed.name().to_string(),
                    error: e.to_string(),
                });
                UpdateOutcome::Failed(e)
            }
        }
    }

    async fn catch_up(&self) -> Result<usize> {
        let (path, params) = match self.feed.source() {
            FeedSource::Statuses { path, params } | FeedSource::Notifications { path, params } => {
                (path.clone(), params.clone())
            }
            FeedSource::Thread(_) => return Err(self.unsupported("update")),
        };
        let since_id = self.cursor.lock().await.most_recent_id.clone();
        let mut pages = fetch_pages(self.client.clone(), path, params, self.limit, since_id);

        let mut fetched = Vec::new();
        let mut newest = None;
        while let Some(items) = pages.try_next().await? {
            let events = self.feed.decode_page(items)?;
            if newest.is_none() {
                newest = events.first().map(|e| e.server_id().to_string());
            }
            fetched.extend(events);
        }
        fetched.reverse();

        let fresh = {
            let mut cursor = self.cursor.lock().await;
            if let Some(newest) = &newest {
                cursor.advance(newest);
            }
            // The fetched ids become the whole window, even when empty.
            let mut window = HashSet::with_capacity(fetched.len());
            let mut fresh = Vec::new();
            for event in fetched {
                let id = event.id().clone();
                if !cursor.seen.contains(&id) && window.insert(id.clone()) {
                    fresh.push(event);
                } else {
                    window.insert(id);
                }
            }
            cursor.seen = window;
            fresh
        };

        let delivered = fresh.len();
        for event in fresh {
            self.push(event).await;
        }
        Ok(delivered)
    }

    /// Consume pushed events until cancelled, then hand the subscription
    /// back so the caller can close it.
    async fn consume(
        self: Arc<Self>,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> Subscription {
        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                raw = subscription.get() => raw,
            };
            let Some(raw) = raw else {
                debug!(feed = self.feed.name(), "subscription ended");
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.accept_pushed(raw) => {}
            }
        }
        subscription
    }

    async fn accept_pushed(&self, raw: RawEvent) {
        if !self.feed.handles(&raw.kind) {
            trace!(feed = self.feed.name(), kind = %raw.kind, "ignoring pushed event");
            return;
        }
        let event = match DomainEvent::from_raw(&raw) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!(feed = self.feed.name(), kind = %raw.kind, error = %e, "dropping undecodable pushed event");
                return;
            }
        };
        let fresh = self.cursor.lock().await.seen.insert(event.id().clone());
        if fresh {
            self.push(event).await;
        } else {
            debug!(feed = self.feed.name(), id = %event.id(), "duplicate pushed event");
        }
    }
}

fn drain(inbound: &mut mpsc::Receiver<DomainEvent>, mut events: Vec<DomainEvent>) -> Vec<DomainEvent> {
    while let Ok(event) = inbound.try_recv() {
        events.push(event);
    }
    events
}
