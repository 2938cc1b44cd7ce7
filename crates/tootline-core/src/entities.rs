//! Lean decodings of the Mastodon entities the timeline engine touches.
//! Fields the engine does not read are left out; unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, NotificationId, StatusId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub id: StatusId,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub in_reply_to_id: Option<StatusId>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub replies_count: u64,
    #[serde(default)]
    pub reblogs_count: u64,
    #[serde(default)]
    pub favourites_count: u64,
}

impl Status {
    /// The status whose content is shown: the reblogged one for a boost.
    pub fn original(&self) -> &Status {
        self.reblog.as_deref().unwrap_or(self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
    #[serde(rename = "mention")]
    Mention,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "reblog")]
    Reblog,
    #[serde(rename = "follow")]
    Follow,
    #[serde(rename = "follow_request")]
    FollowRequest,
    #[serde(rename = "favourite")]
    Favourite,
    #[serde(rename = "poll")]
    Poll,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "admin.sign_up")]
    AdminSignUp,
    #[serde(rename = "admin.report")]
    AdminReport,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    #[serde(default)]
    pub status: Option<Status>,
}

/// Response of `/api/v1/statuses/:id/context`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusContext {
    pub ancestors: Vec<Status>,
    pub descendants: Vec<Status>,
}

/// The parts of `/api/v1/instance` used to locate the push endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub uri: String,
    #[serde(default)]
    pub urls: InstanceUrls,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstanceUrls {
    #[serde(default)]
    pub streaming_api: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixtures::{account_json, status_json};
    use serde_json::json;

    #[test]
    fn decodes_status_and_ignores_unknown_fields() {
        let status: Status = serde_json::from_value(status_json("42")).unwrap();
        assert_eq!(status.id.as_str(), "42");
        assert_eq!(status.account.acct, "alice");
        assert!(status.reblog.is_none());
        assert_eq!(status.original().id, status.id);
    }

    #[test]
    fn original_follows_reblog() {
        let mut outer = status_json("2");
        outer["reblog"] = status_json("1");
        let status: Status = serde_json::from_value(outer).unwrap();
        assert_eq!(status.original().id.as_str(), "1");
    }

    #[test]
    fn decodes_notification_types() {
        let n: Notification = serde_json::from_value(json!({
            "id": "9",
            "type": "favourite",
            "created_at": "2024-03-01T12:00:00Z",
            "account": account_json("3"),
            "status": status_json("5"),
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationType::Favourite);
        assert_eq!(n.status.unwrap().id.as_str(), "5");

        let n: Notification = serde_json::from_value(json!({
            "id": "10",
            "type": "admin.sign_up",
            "created_at": "2024-03-01T12:00:00Z",
            "account": account_json("3"),
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationType::AdminSignUp);
        assert!(n.status.is_none());
    }

    #[test]
    fn unknown_notification_type_is_tolerated() {
        let n: Notification = serde_json::from_value(json!({
            "id": "11",
            "type": "severed_relationships",
            "created_at": "2024-03-01T12:00:00Z",
            "account": account_json("3"),
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationType::Unknown);
    }
}
