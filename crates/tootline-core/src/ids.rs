use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

macro_rules! server_id {
    ($name:ident) => {
        /// Identifier assigned by the instance. Opaque, but ordered by
        /// [`compare_server_ids`] for cursor tracking.
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

server_id!(StatusId);
server_id!(NotificationId);
server_id!(AccountId);

/// Stable identity of a feed-level event, e.g. `status:1098` or
/// `notification:77`. Used for deduplication and list identity only.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn status(id: &StatusId) -> Self {
        Self(format!("status:{id}"))
    }

    pub fn notification(id: &NotificationId) -> Self {
        Self(format!("notification:{id}"))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order two server ids. Mastodon ids are decimal snowflakes serialized as
/// strings, so a longer id is newer and equal-length ids compare lexically.
pub fn compare_server_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Whether `candidate` is strictly newer than `current`.
pub fn is_newer_id(candidate: &str, current: &str) -> bool {
    compare_server_ids(candidate, current) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_prefixes() {
        assert_eq!(
            EventId::status(&StatusId::from_raw("42")).as_str(),
            "status:42"
        );
        assert_eq!(
            EventId::notification(&NotificationId::from_raw("7")).as_str(),
            "notification:7"
        );
    }

    #[test]
    fn longer_ids_are_newer() {
        assert!(is_newer_id("100", "99"));
        assert!(!is_newer_id("99", "100"));
    }

    #[test]
    fn equal_length_ids_compare_lexically() {
        assert!(is_newer_id("109876543210000001", "109876543210000000"));
        assert!(!is_newer_id("5", "5"));
    }

    #[test]
    fn serde_is_transparent() {
        let id: StatusId = serde_json::from_str("\"1234\"").unwrap();
        assert_eq!(id.as_str(), "1234");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1234\"");
    }
}
