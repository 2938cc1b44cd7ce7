pub mod client;
pub mod entities;
pub mod errors;
pub mod events;
pub mod ids;
pub mod links;
pub mod topic;

pub mod mock;

pub use client::{ApiClient, ApiResponse, ByteStream, FrameStream, Method, QueryParams};
pub use errors::ApiError;
pub use events::{DomainEvent, EventBody, EventKind, RawEvent};
pub use ids::EventId;
pub use topic::Topic;
