use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};
use url::Url;

use tootline_core::entities::Instance;
use tootline_core::{ApiClient, ApiError, ApiResponse, ByteStream, FrameStream, Method, QueryParams};

const SOCKET_PATH: &str = "/api/v1/streaming";

/// Connection settings for one instance.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    /// Push endpoint; the base URL is used when unset.
    pub streaming_url: Option<String>,
    pub access_token: Option<SecretString>,
    pub connect_timeout: Duration,
    /// Applies to buffered REST calls only; push connections stay open.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            streaming_url: None,
            access_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// [`ApiClient`] backed by reqwest for REST and frame-per-line push, and by
/// tokio-tungstenite for the push socket.
pub struct MastodonClient {
    http: Client,
    base_url: Url,
    streaming_url: Url,
    token: Option<SecretString>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl MastodonClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let base_url = parse_url(&config.base_url)?;
        let streaming_url = match &config.streaming_url {
            Some(url) => parse_url(url)?,
            None => base_url.clone(),
        };
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("tootline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            streaming_url,
            token: config.access_token,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The push endpoint. Its scheme decides the wire encoding: `http(s)`
    /// for frame-per-line, `ws(s)` for the socket.
    pub fn streaming_url(&self) -> &Url {
        &self.streaming_url
    }

    pub fn set_streaming_url(&mut self, url: &str) -> Result<(), ApiError> {
        self.streaming_url = parse_url(url)?;
        Ok(())
    }

    /// Ask the instance where its push endpoint lives.
    pub async fn discover_streaming_url(&self) -> Result<Option<String>, ApiError> {
        let response = self
            .request(Method::Get, "/api/v1/instance", &QueryParams::new())
            .await?;
        let instance: Instance = response.json()?;
        Ok(instance.urls.streaming_api.filter(|url| !url.is_empty()))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout(self.request_timeout)
        } else {
            ApiError::Network(e.to_string())
        }
    }

    fn socket_url(&self, params: &QueryParams) -> Result<Url, ApiError> {
        let mut url = endpoint(&self.streaming_url, SOCKET_PATH, params)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ApiError::InvalidUrl(format!("cannot use {scheme} for {url}")))?;
        Ok(url)
    }
}

fn parse_url(raw: &str) -> Result<Url, ApiError> {
    Url::parse(raw.trim_end_matches('/')).map_err(|e| ApiError::InvalidUrl(format!("{raw}: {e}")))
}

/// Join `path` (which may carry its own query string) onto `base` and append
/// `params`.
fn endpoint(base: &Url, path: &str, params: &QueryParams) -> Result<Url, ApiError> {
    let mut url = base
        .join(path)
        .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params.iter() {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl ApiClient for MastodonClient {
    #[instrument(skip(self, params))]
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &QueryParams,
    ) -> Result<ApiResponse, ApiError> {
        let url = endpoint(&self.base_url, path, params)?;
        debug!("--> {method} {url}");
        let started = Instant::now();

        let response = self
            .authorize(self.http.request(reqwest_method(method), url.clone()))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        debug!(
            "<-- {method} {url} HTTP {status} {}ms",
            started.elapsed().as_millis()
        );

        if !(200..300).contains(&status) {
            let err = ApiError::from_status(status, &body);
            warn!(status, error = %err, "request failed");
            return Err(err);
        }

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_event_stream(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<ByteStream, ApiError> {
        let url = endpoint(&self.streaming_url, path, params)?;
        debug!("--> GET {url} (event stream)");

        let response = self
            .authorize(self.http.get(url.clone()))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        debug!("<-- GET {url} HTTP {status}");
        if !response.status().is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::StreamInterrupted(e.to_string())));
        Ok(Box::pin(chunks))
    }

    async fn connect_socket(&self, params: &QueryParams) -> Result<FrameStream, ApiError> {
        let url = self.socket_url(params)?;
        debug!("--> CONNECT {url}");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| ApiError::Socket(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ApiError::Timeout(self.connect_timeout))?
                .map_err(|e| ApiError::Socket(e.to_string()))?;
        debug!("<-- CONNECT {url} HTTP {}", response.status().as_u16());

        let frames = stream::unfold(socket, |mut socket| async move {
            loop {
                match socket.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text.as_str().to_owned()), socket)),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "socket closed by peer");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(e) => return Some((Err(ApiError::Socket(e.to_string())), socket)),
                }
            }
        });
        Ok(Box::pin(frames))
    }
}
