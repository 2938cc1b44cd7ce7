use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use tootline_core::entities::{Account, Notification, Status};
use tootline_core::ids::AccountId;
use tootline_core::{ApiClient, DomainEvent, EventKind, Method, QueryParams, Topic};

use crate::error::{Result, TimelineError};

/// Characters left alone when a hashtag is placed in a URL path.
const TAG_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where a feed's history comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedSource {
    /// A paginated list of statuses.
    Statuses { path: String, params: QueryParams },
    /// A paginated list of notifications.
    Notifications { path: String, params: QueryParams },
    /// The thread around one status, fetched as a single batch.
    Thread(Box<Status>),
}

/// Everything that differs between feed types: the REST source, the push
/// topic, which pushed kinds matter, and which operations are allowed.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedSpec {
    name: String,
    source: FeedSource,
    topic: Option<Topic>,
    kinds: Vec<EventKind>,
    can_update: bool,
}

impl FeedSpec {
    fn statuses(name: impl Into<String>, path: String, params: QueryParams) -> Self {
        Self {
            name: name.into(),
            source: FeedSource::Statuses { path, params },
            topic: None,
            kinds: Vec::new(),
            can_update: true,
        }
    }

    fn streamed(mut self, topic: Topic, kind: EventKind) -> Self {
        self.topic = Some(topic);
        self.kinds = vec![kind];
        self
    }

    pub fn home() -> Self {
        Self::statuses("Home", "/api/v1/timelines/home".into(), QueryParams::new())
            .streamed(Topic::user(), EventKind::Update)
    }

    pub fn local() -> Self {
        Self::statuses(
            "Local",
            "/api/v1/timelines/public".into(),
            QueryParams::new().with("local", true),
        )
        .streamed(Topic::public_local(), EventKind::Update)
    }

    pub fn federated() -> Self {
        Self::statuses(
            "Federated",
            "/api/v1/timelines/public".into(),
            QueryParams::new().with("local", false),
        )
        .streamed(Topic::public(), EventKind::Update)
    }

    /// Statuses posted by one account. There is no push topic for these.
    pub fn account(title: impl Into<String>, id: &AccountId, replies: bool, reblogs: bool) -> Self {
        Self::statuses(
            title,
            format!("/api/v1/accounts/{id}/statuses"),
            QueryParams::new()
                .with("exclude_replies", !replies)
                .with("exclude_reblogs", !reblogs),
        )
    }

    /// Resolve `acct` (e.g. `alice` or `alice@example.social`) and build its
    /// account feed.
    pub async fn account_by_name(
        client: &Arc<dyn ApiClient>,
        acct: &str,
        replies: bool,
        reblogs: bool,
    ) -> Result<Self> {
        let params = QueryParams::new().with("acct", acct);
        let response = client
            .request(Method::Get, "/api/v1/accounts/lookup", &params)
            .await?;
        let account: Account = response.json()?;
        Ok(Self::account(acct, &account.id, replies, reblogs))
    }

    /// Statuses carrying `tag`. A leading `#` is dropped.
    pub fn hashtag(tag: &str, local: bool, remote: bool) -> Result<Self> {
        let tag = tag.strip_prefix('#').unwrap_or(tag);
        if tag.is_empty() {
            return Err(TimelineError::InvalidFeed("hashtag is empty".into()));
        }
        let path = format!(
            "/api/v1/timelines/tag/{}",
            utf8_percent_encode(tag, TAG_PATH)
        );
        let params = QueryParams::new()
            .with("local", local)
            .with("remote", remote);
        Ok(Self::statuses(format!("#{tag}"), path, params)
            .streamed(Topic::hashtag(tag, local), EventKind::Update))
    }

    pub fn notifications() -> Self {
        Self {
            name: "Notifications".into(),
            source: FeedSource::Notifications {
                path: "/api/v1/notifications".into(),
                params: QueryParams::new(),
            },
            topic: Some(Topic::user_notification()),
            kinds: vec![EventKind::Notification],
            can_update: true,
        }
    }

    /// The conversation around `status`. Neither updates nor streams.
    pub fn thread(status: Status) -> Self {
        Self {
            name: "Thread".into(),
            source: FeedSource::Thread(Box::new(status)),
            topic: None,
            kinds: Vec::new(),
            can_update: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    pub fn topic(&self) -> Option<&Topic> {
        self.topic.as_ref()
    }

    pub fn handles(&self, kind: &EventKind) -> bool {
        self.kinds.contains(kind)
    }

    pub fn can_update(&self) -> bool {
        self.can_update
    }

    pub fn can_stream(&self) -> bool {
        self.topic.is_some()
    }

    /// Turn one page of REST entities into events, keeping page order.
    pub(crate) fn decode_page(&self, items: Vec<Value>) -> Result<Vec<DomainEvent>> {
        let events = match &self.source {
            FeedSource::Notifications { .. } => items
                .into_iter()
                .map(|item| serde_json::from_value::<Notification>(item).map(DomainEvent::from_notification))
                .collect::<std::result::Result<_, _>>()?,
            FeedSource::Statuses { .. } | FeedSource::Thread(_) => items
                .into_iter()
                .map(|item| serde_json::from_value::<Status>(item).map(DomainEvent::from_status))
                .collect::<std::result::Result<_, _>>()?,
        };
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tootline_core::mock::fixtures::{account_json, notification_json, status_json};
    use tootline_core::mock::MockApiClient;
    use tootline_core::EventBody;

    fn paged(feed: &FeedSpec) -> (&str, &QueryParams) {
        match feed.source() {
            FeedSource::Statuses { path, params } | FeedSource::Notifications { path, params } => {
                (path, params)
            }
            FeedSource::Thread(_) => panic!("thread feed is not paged"),
        }
    }

    #[test]
    fn public_feeds_differ_by_local_flag_and_topic() {
        let local = FeedSpec::local();
        let federated = FeedSpec::federated();
        assert_eq!(paged(&local).0, "/api/v1/timelines/public");
        assert_eq!(paged(&local).1.get("local"), Some("true"));
        assert_eq!(paged(&federated).1.get("local"), Some("false"));
        assert_eq!(local.topic(), Some(&Topic::public_local()));
        assert_eq!(federated.topic(), Some(&Topic::public()));
        assert!(local.handles(&EventKind::Update));
        assert!(!local.handles(&EventKind::Notification));
    }

    #[test]
    fn account_feed_inverts_inclusion_flags_and_cannot_stream() {
        let feed = FeedSpec::account("alice", &AccountId::from_raw("77"), false, true);
        let (path, params) = paged(&feed);
        assert_eq!(path, "/api/v1/accounts/77/statuses");
        assert_eq!(params.get("exclude_replies"), Some("true"));
        assert_eq!(params.get("exclude_reblogs"), Some("false"));
        assert!(feed.can_update());
        assert!(!feed.can_stream());
    }

    #[test]
    fn hashtag_strips_hash_and_encodes_path() {
        let feed = FeedSpec::hashtag("#café", true, false).unwrap();
        assert_eq!(feed.name(), "#café");
        assert_eq!(paged(&feed).0, "/api/v1/timelines/tag/caf%C3%A9");
        assert_eq!(paged(&feed).1.get("local"), Some("true"));
        assert_eq!(paged(&feed).1.get("remote"), Some("false"));
        assert_eq!(feed.topic(), Some(&Topic::hashtag("café", true)));

        let plain = FeedSpec::hashtag("rust_lang", false, false).unwrap();
        assert_eq!(paged(&plain).0, "/api/v1/timelines/tag/rust_lang");
        assert_eq!(plain.topic(), Some(&Topic::hashtag("rust_lang", false)));
    }

    #[test]
    fn empty_hashtag_is_rejected() {
        for tag in ["", "#"] {
            assert!(matches!(
                FeedSpec::hashtag(tag, false, false),
                Err(TimelineError::InvalidFeed(_))
            ));
        }
    }

    #[test]
    fn notifications_and_thread_capabilities() {
        let notifications = FeedSpec::notifications();
        assert_eq!(notifications.topic(), Some(&Topic::user_notification()));
        assert!(notifications.handles(&EventKind::Notification));
        assert!(!notifications.handles(&EventKind::Update));

        let status: Status = serde_json::from_value(status_json("5")).unwrap();
        let thread = FeedSpec::thread(status);
        assert!(!thread.can_update());
        assert!(!thread.can_stream());
    }

    #[test]
    fn decodes_pages_by_source() {
        let events = FeedSpec::notifications()
            .decode_page(vec![notification_json("3", "mention")])
            .unwrap();
        assert_eq!(events[0].id().as_str(), "notification:3");
        assert!(matches!(events[0].body(), EventBody::Notification(_)));

        let events = FeedSpec::home()
            .decode_page(vec![status_json("2"), status_json("1")])
            .unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.server_id()).collect();
        assert_eq!(ids, ["2", "1"]);

        assert!(FeedSpec::home()
            .decode_page(vec![serde_json::json!({"id": "1"})])
            .is_err());
    }

    #[tokio::test]
    async fn account_lookup_by_name() {
        let mock = Arc::new(MockApiClient::new());
        mock.push_page("/api/v1/accounts/lookup", account_json("108"));
        let client: Arc<dyn ApiClient> = mock.clone();

        let feed = FeedSpec::account_by_name(&client, "alice@example.social", true, true)
            .await
            .unwrap();
        assert_eq!(paged(&feed).0, "/api/v1/accounts/108/statuses");
        assert_eq!(feed.name(), "alice@example.social");
        assert_eq!(mock.calls()[0].params.get("acct"), Some("alice@example.social"));
    }
}
