//! Walks a paginated list endpoint by following `Link: rel="next"`.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tracing::debug;

use tootline_core::links::next_page;
use tootline_core::{ApiClient, Method, QueryParams};

use crate::error::Result;

pub const DEFAULT_LIMIT: u32 = 40;

/// Lazily fetch pages of `path`, newest first, until the server returns an
/// empty page or stops advertising a next link. `limit` and `since_id` are
/// added to `params`. Next-page links carry their own query, so only the
/// parameters the link leaves out are appended to them.
pub fn fetch_pages(
    client: Arc<dyn ApiClient>,
    path: String,
    params: QueryParams,
    limit: u32,
    since_id: Option<String>,
) -> BoxStream<'static, Result<Vec<Value>>> {
    let mut params = params.with("limit", limit);
    if let Some(since_id) = since_id {
        params.set("since_id", since_id);
    }

    stream::try_unfold(Some(path), move |next| {
        let client = client.clone();
        let params = params.clone();
        async move {
            let Some(path) = next else {
                return Ok(None);
            };
            let query = missing_params(&path, &params);
            let response = client.request(Method::Get, &path, &query).await?;
            let items: Vec<Value> = response.json()?;
            if items.is_empty() {
                debug!(path = %path, "empty page, stopping");
                return Ok(None);
            }
            let next = next_page(&response);
            debug!(path = %path, items = items.len(), has_next = next.is_some(), "fetched page");
            Ok(Some((items, next)))
        }
    })
    .boxed()
}

/// The subset of `params` whose keys are not already in `path`'s query.
fn missing_params(path: &str, params: &QueryParams) -> QueryParams {
    let Some((_, query)) = path.split_once('?') else {
        return params.clone();
    };
    let present: Vec<&str> = query
        .split('&')
        .filter_map(|pair| pair.split('=').next())
        .collect();
    let mut missing = QueryParams::new();
    for (key, value) in params.iter() {
        if !present.contains(&key) {
            missing.set(key, value);
        }
    }
    missing
}
