use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::entities::{Notification, Status};
use crate::ids::EventId;
use crate::topic::Topic;

/// Kind tag of a pushed event. Unrecognised tags are kept verbatim in
/// `Unknown` so consumers match them explicitly instead of by accident.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Update,
    Delete,
    Notification,
    StatusUpdate,
    FiltersChanged,
    Conversation,
    Announcement,
    AnnouncementReaction,
    AnnouncementDelete,
    NotificationsMerged,
    Unknown(String),
}

impl EventKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "update" => Self::Update,
            "delete" => Self::Delete,
            "notification" => Self::Notification,
            "status.update" => Self::StatusUpdate,
            "filters_changed" => Self::FiltersChanged,
            "conversation" => Self::Conversation,
            "announcement" => Self::Announcement,
            "announcement.reaction" => Self::AnnouncementReaction,
            "announcement.delete" => Self::AnnouncementDelete,
            "notifications_merged" => Self::NotificationsMerged,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Notification => "notification",
            Self::StatusUpdate => "status.update",
            Self::FiltersChanged => "filters_changed",
            Self::Conversation => "conversation",
            Self::Announcement => "announcement",
            Self::AnnouncementReaction => "announcement.reaction",
            Self::AnnouncementDelete => "announcement.delete",
            Self::NotificationsMerged => "notifications_merged",
            Self::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One undecoded event taken off a push connection.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    pub topic: Topic,
    pub kind: EventKind,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Status(Box<Status>),
    Notification(Box<Notification>),
}

/// A typed feed-level event with a stable identity and a timestamp.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DomainEvent {
    id: EventId,
    created_at: DateTime<Utc>,
    body: EventBody,
}

impl DomainEvent {
    pub fn from_status(status: Status) -> Self {
        Self {
            id: EventId::status(&status.id),
            created_at: status.created_at,
            body: EventBody::Status(Box::new(status)),
        }
    }

    pub fn from_notification(notification: Notification) -> Self {
        Self {
            id: EventId::notification(&notification.id),
            created_at: notification.created_at,
            body: EventBody::Notification(Box::new(notification)),
        }
    }

    /// Decode a pushed event. Kinds that carry neither a status nor a
    /// notification decode to `None`.
    pub fn from_raw(raw: &RawEvent) -> Result<Option<Self>, serde_json::Error> {
        match raw.kind {
            EventKind::Update | EventKind::StatusUpdate => {
                let status: Status = serde_json::from_value(raw.payload.clone())?;
                Ok(Some(Self::from_status(status)))
            }
            EventKind::Notification => {
                let notification: Notification = serde_json::from_value(raw.payload.clone())?;
                Ok(Some(Self::from_notification(notification)))
            }
            _ => Ok(None),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    /// The server id of the wrapped entity, used as a pagination cursor.
    pub fn server_id(&self) -> &str {
        match &self.body {
            EventBody::Status(status) => status.id.as_str(),
            EventBody::Notification(notification) => notification.id.as_str(),
        }
    }

    /// The status this event is about, if any.
    pub fn status(&self) -> Option<&Status> {
        match &self.body {
            EventBody::Status(status) => Some(status),
            EventBody::Notification(notification) => notification.status.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixtures::{notification_json, status_json};

    #[test]
    fn kind_roundtrips_known_tags() {
        for tag in ["update", "delete", "notification", "status.update", "filters_changed"] {
            assert_eq!(EventKind::parse(tag).as_str(), tag);
        }
    }

    #[test]
    fn unknown_kind_is_explicit() {
        let kind = EventKind::parse("encrypted_message");
        assert_eq!(kind, EventKind::Unknown("encrypted_message".into()));
        assert_eq!(kind.to_string(), "encrypted_message");
    }

    #[test]
    fn decodes_update_into_status_event() {
        let raw = RawEvent {
            topic: Topic::user(),
            kind: EventKind::Update,
            payload: status_json("12"),
        };
        let event = DomainEvent::from_raw(&raw).unwrap().unwrap();
        assert_eq!(event.id().as_str(), "status:12");
        assert_eq!(event.server_id(), "12");
        assert!(event.status().is_some());
    }

    #[test]
    fn decodes_notification_event() {
        let raw = RawEvent {
            topic: Topic::user(),
            kind: EventKind::Notification,
            payload: notification_json("5", "mention"),
        };
        let event = DomainEvent::from_raw(&raw).unwrap().unwrap();
        assert_eq!(event.id().as_str(), "notification:5");
        assert!(matches!(event.body(), EventBody::Notification(_)));
    }

    #[test]
    fn delete_carries_no_domain_event() {
        let raw = RawEvent {
            topic: Topic::user(),
            kind: EventKind::Delete,
            payload: Value::String("12".into()),
        };
        assert!(DomainEvent::from_raw(&raw).unwrap().is_none());
    }

    #[test]
    fn malformed_status_payload_is_an_error() {
        let raw = RawEvent {
            topic: Topic::user(),
            kind: EventKind::Update,
            payload: serde_json::json!({"id": "1"}),
        };
        assert!(DomainEvent::from_raw(&raw).is_err());
    }
}
