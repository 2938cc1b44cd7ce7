//! Network side of tootline: a reqwest client for the REST API and the
//! frame-per-line push endpoint, and a tokio-tungstenite connector for the
//! push socket.

mod client;

pub use client::{ClientConfig, MastodonClient};
