//! One engine per open feed. It catches up over REST, listens on the feed's
//! push topic, and hands the consumer a single deduplicated queue.

pub mod error;
pub mod feed;
pub mod pages;
pub mod timeline;

pub use error::{TimelineError, UpdateOutcome};
pub use feed::{FeedSource, FeedSpec};
pub use timeline::{Timeline, TimelineNotice, TimelineOptions, QUEUE_CAPACITY};
