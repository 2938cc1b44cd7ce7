//! Live push delivery: one upstream connection per topic, shared by every
//! subscription on that topic.
//!
//! A [`Transport`] owns the connection and reconnects forever after a fixed
//! backoff. A [`TopicInstance`] fans each event out to its subscribers, and
//! the [`Multiplexer`] opens and closes instances as subscriptions come and go.

pub mod error;
pub mod frames;
pub mod multiplexer;
pub mod sse;
pub mod subscription;
pub mod topic_instance;
pub mod transport;

pub use error::{FrameError, StreamError};
pub use multiplexer::Multiplexer;
pub use subscription::Subscription;
pub use topic_instance::{SubscriberId, TopicInstance};
pub use transport::{PushScheme, Transport, TransportConfig, TransportState};
