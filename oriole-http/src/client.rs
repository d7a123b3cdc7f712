//! The REST client: builds requests, sequences them through the rate
//! limiters, sends them, and classifies the response.

use crate::error::{Error, ErrorType, Result};
use dashmap::DashMap;
use hyper::{
    body,
    client::{Client as HyperClient, HttpConnector},
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    Body, Request as HyperRequest, Response, StatusCode, Uri,
};
use oriole_dispatch::Dispatcher;
use oriole_http_ratelimiting::{BucketRateLimiter, GlobalRateLimiter, RatelimitHeaders};
use oriole_model::Route;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::{distributions::Alphanumeric, Rng};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

#[cfg(feature = "rustls-native-roots")]
type Connector = hyper_rustls::HttpsConnector<HttpConnector>;
#[cfg(not(feature = "rustls-native-roots"))]
type Connector = HttpConnector;

const API_BASE: &str = "https://discord.com/api/v10";

fn user_agent() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "DiscordBot (https://github.com/oriole-rs/oriole, {})",
        env!("CARGO_PKG_VERSION")
    ))
    .expect("static user-agent format is always a valid header value")
}

fn build_connector() -> HyperClient<Connector, Body> {
    #[cfg(feature = "rustls-native-roots")]
    {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        HyperClient::builder().build(connector)
    }

    #[cfg(not(feature = "rustls-native-roots"))]
    {
        HyperClient::new()
    }
}

/// Event emitted on [`Client::dispatcher`] after a request completes,
/// independent of whether it succeeded.
#[derive(Clone, Debug)]
pub struct RequestResponse {
    /// Path the request was sent to.
    pub path: Box<str>,
    /// Final status code received (the one that ended retrying).
    pub status: u16,
    /// Number of rate-limit retries the request needed.
    pub rate_limit_retries: u32,
}

/// Fatal error reported instead of a normal dispatch, mirroring handler
/// failures surfaced on an [`oriole_dispatch::Dispatcher`]'s error key.
type EventKey = &'static str;

/// Builds, rate-limits, sends, and classifies requests against the Discord
/// REST API.
///
/// A single client may issue requests on behalf of several distinct tokens;
/// each `rate_limit_key` passed to [`Client::request`] gets its own
/// [`BucketRateLimiter`] and [`GlobalRateLimiter`], since Discord's rate
/// limits are tracked per token, not per process.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    http: HyperClient<Connector, Body>,
    buckets: DashMap<Box<str>, BucketRateLimiter>,
    globals: DashMap<Box<str>, GlobalRateLimiter>,
    dispatcher: Dispatcher<EventKey, RequestResponse>,
    timeout: Duration,
    max_retries: u32,
    max_rate_limit_retries: u32,
    global_limit: usize,
}

/// Configures and builds a [`Client`].
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    timeout: Duration,
    max_retries: u32,
    max_rate_limit_retries: u32,
    global_limit: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 5,
            max_rate_limit_retries: 10,
            global_limit: oriole_http_ratelimiting::global::DEFAULT_LIMIT,
        }
    }
}

impl ClientBuilder {
    /// Start building a client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait for a response before treating the request as
    /// timed out. Default 10 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum number of retries for network-level failures. Default 5.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum number of retries after a 429 before giving up with
    /// [`ErrorType::RateLimitingFailed`]. Default 10.
    #[must_use]
    pub const fn max_rate_limit_retries(mut self, max_rate_limit_retries: u32) -> Self {
        self.max_rate_limit_retries = max_rate_limit_retries;
        self
    }

    /// Requests/second admitted by a token's [`GlobalRateLimiter`] absent a
    /// negotiated higher limit. Default 50.
    #[must_use]
    pub const fn global_limit(mut self, global_limit: usize) -> Self {
        self.global_limit = global_limit;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(Inner {
                http: build_connector(),
                buckets: DashMap::new(),
                globals: DashMap::new(),
                dispatcher: Dispatcher::new(),
                timeout: self.timeout,
                max_retries: self.max_retries,
                max_rate_limit_retries: self.max_rate_limit_retries,
                global_limit: self.global_limit,
            }),
        }
    }
}

impl Client {
    /// Build a client with default settings.
    #[must_use]
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    /// Start configuring a client.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The dispatcher `request_response` events (and handler failures) are
    /// emitted on.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<EventKey, RequestResponse> {
        &self.inner.dispatcher
    }

    fn bucket_limiter(&self, rate_limit_key: &str) -> BucketRateLimiter {
        self.inner
            .buckets
            .entry(rate_limit_key.into())
            .or_default()
            .clone()
    }

    fn global_limiter(&self, rate_limit_key: &str) -> GlobalRateLimiter {
        self.inner
            .globals
            .entry(rate_limit_key.into())
            .or_insert_with(|| {
                GlobalRateLimiter::new(self.inner.global_limit, Duration::from_secs(1))
            })
            .clone()
    }

    /// Send a request, retrying on transient failures and rate limits.
    ///
    /// `token` is sent as `Authorization: Bot <token>` (pass a bearer token
    /// with a leading `Bearer ` already applied if needed); `rate_limit_key`
    /// selects which token's rate-limit state this request is sequenced
    /// against, and `priority` orders it within its bucket. `query` pairs
    /// are percent-encoded and appended to the route's path. When `files`
    /// is non-empty the request is sent as `multipart/form-data` per
    /// Discord's `payload_json` contract (the JSON body, if any, becomes
    /// the `payload_json` field); otherwise `body_bytes` is sent as a plain
    /// JSON body.
    ///
    /// Returns the raw response; deserializing the body is the caller's
    /// concern.
    ///
    /// # Errors
    ///
    /// See [`ErrorType`] for the classification of failures this can
    /// return.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        route: &Route<'_>,
        token: &str,
        rate_limit_key: &str,
        priority: i64,
        query: &[(&str, &str)],
        body_bytes: Option<Vec<u8>>,
        files: &[(&str, &[u8])],
    ) -> Result<Response<Body>> {
        let global = self.global_limiter(rate_limit_key);
        let bucket = self.bucket_limiter(rate_limit_key);

        let mut rate_limit_retries = 0u32;

        loop {
            global.acquire().await;

            let ticket = bucket.acquire(route.bucket_key(), priority);
            let sender = ticket
                .await
                .map_err(|source| Error::with_source(ErrorType::RequestCanceled, source))?;

            let response = self
                .send_once(route, token, query, body_bytes.clone(), files)
                .await;

            let (headers, result) = match response {
                Ok(resp) => {
                    let headers = RatelimitHeaders::from_pairs(header_pairs(&resp)).ok();
                    (headers, Ok(resp))
                }
                Err(err) => (None, Err(err)),
            };

            let _ = sender.headers(headers.clone());

            if let Some(RatelimitHeaders::GlobalLimited(limited)) = &headers {
                global.freeze(Duration::from_secs(limited.retry_after()));
            }

            let response = result?;

            if response.status().is_success() {
                self.emit_request_response(route, response.status(), rate_limit_retries);
                return Ok(response);
            }

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let body = read_body(response).await?;

                if is_cloudflare_ban(&body) {
                    return Err(Error::new(ErrorType::CloudflareBan));
                }

                rate_limit_retries += 1;

                if rate_limit_retries > self.inner.max_rate_limit_retries {
                    return Err(Error::new(ErrorType::RateLimitingFailed {
                        status: StatusCode::TOO_MANY_REQUESTS,
                    }));
                }

                // The bucket/global state was already updated above from
                // `headers` before the body was read; retrying from the top
                // re-enters both gates.
                continue;
            }

            self.emit_request_response(route, response.status(), rate_limit_retries);

            return Err(self.classify_error(response).await?);
        }
    }

    async fn send_once(
        &self,
        route: &Route<'_>,
        token: &str,
        query: &[(&str, &str)],
        body_bytes: Option<Vec<u8>>,
        files: &[(&str, &[u8])],
    ) -> Result<Response<Body>> {
        let mut attempt = 0u32;

        loop {
            let uri: Uri = format!("{API_BASE}{}{}", route.path(), encode_query(query))
                .parse()
                .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;

            let mut builder = HyperRequest::builder()
                .method(route.method().clone())
                .uri(uri)
                .header(USER_AGENT, user_agent())
                .header(
                    AUTHORIZATION,
                    HeaderValue::from_str(token)
                        .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?,
                );

            let body = if files.is_empty() {
                if body_bytes.is_some() {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }

                body_bytes.clone().map_or_else(Body::empty, Body::from)
            } else {
                let boundary = multipart_boundary();
                builder = builder.header(
                    CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                );

                Body::from(build_multipart(&boundary, body_bytes.as_deref(), files))
            };

            let request = builder
                .body(body)
                .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;

            let sent = tokio::time::timeout(self.inner.timeout, self.inner.http.request(request)).await;

            match sent {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(source)) => {
                    if attempt >= self.inner.max_retries {
                        return Err(Error::with_source(ErrorType::RequestError, source));
                    }

                    attempt += 1;

                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %source, "request failed, retrying");

                    sleep(backoff(attempt)).await;
                }
                Err(source) => {
                    if attempt >= self.inner.max_retries {
                        return Err(Error::with_source(ErrorType::RequestTimedOut, source));
                    }

                    attempt += 1;

                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, "request timed out, retrying");

                    sleep(backoff(attempt)).await;
                }
            }
        }
    }

    async fn classify_error(&self, response: Response<Body>) -> Result<Error> {
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED => Ok(Error::new(ErrorType::Unauthorized)),
            StatusCode::FORBIDDEN => Ok(Error::new(ErrorType::Forbidden)),
            StatusCode::NOT_FOUND => Ok(Error::new(ErrorType::NotFound)),
            StatusCode::BAD_REQUEST => {
                let body = read_body(response).await?;
                Ok(Error::new(ErrorType::BadRequest { body }))
            }
            s if s.is_server_error() => Ok(Error::new(ErrorType::InternalServerError { status })),
            _ => Ok(Error::new(ErrorType::InternalServerError { status })),
        }
    }

    fn emit_request_response(&self, route: &Route<'_>, status: StatusCode, rate_limit_retries: u32) {
        let event = RequestResponse {
            path: route.path().into(),
            status: status.as_u16(),
            rate_limit_retries,
        };

        let _ = self.inner.dispatcher.dispatch("request_response", event);
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100u64.saturating_mul(1 << attempt.min(6)))
}

/// Percent-encode and join `pairs` into a `?key=value&...` query string, or
/// an empty string when `pairs` is empty.
fn encode_query(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }

    let mut query = String::from("?");

    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            query.push('&');
        }

        query.push_str(&utf8_percent_encode(key, NON_ALPHANUMERIC).to_string());
        query.push('=');
        query.push_str(&utf8_percent_encode(value, NON_ALPHANUMERIC).to_string());
    }

    query
}

fn multipart_boundary() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    format!("oriole-boundary-{suffix}")
}

/// Build a `multipart/form-data` body per Discord's `payload_json`
/// contract: the JSON body, if any, becomes a `payload_json` field, and
/// each of `files` becomes a `files[n]` part.
fn build_multipart(boundary: &str, payload_json: Option<&[u8]>, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();

    if let Some(payload) = payload_json {
        buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        buf.extend_from_slice(b"Content-Disposition: form-data; name=\"payload_json\"\r\n");
        buf.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        buf.extend_from_slice(payload);
        buf.extend_from_slice(b"\r\n");
    }

    for (index, (filename, data)) in files.iter().enumerate() {
        buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        buf.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files[{index}]\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        buf.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        buf.extend_from_slice(data);
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    buf
}

/// Discord's own 429 body is always a JSON object (`{"message", "retry_after",
/// "global"}`); Cloudflare's 1015 block page is HTML. A non-JSON body on a
/// 429 means the edge blocked the request before it reached Discord.
fn is_cloudflare_ban(body: &[u8]) -> bool {
    !body.is_empty() && serde_json::from_slice::<serde_json::Value>(body).is_err()
}

async fn read_body(response: Response<Body>) -> Result<Vec<u8>> {
    let bytes = body::to_bytes(response.into_body())
        .await
        .map_err(|source| Error::with_source(ErrorType::ChunkingResponse, source))?;

    Ok(bytes.to_vec())
}

fn header_pairs(response: &Response<Body>) -> impl Iterator<Item = (&str, &[u8])> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::{
        backoff, build_multipart, encode_query, is_cloudflare_ban, Client, ClientBuilder,
    };
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(Client: Clone, Send, Sync);
    assert_impl_all!(ClientBuilder: Clone, Send, Sync);

    #[test]
    fn builder_defaults_match_documented_values() {
        let builder = ClientBuilder::new();

        assert_eq!(Duration::from_secs(10), builder.timeout);
        assert_eq!(5, builder.max_retries);
        assert_eq!(10, builder.max_rate_limit_retries);
        assert_eq!(50, builder.global_limit);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let builder = ClientBuilder::new()
            .timeout(Duration::from_secs(1))
            .max_retries(1)
            .max_rate_limit_retries(2)
            .global_limit(3);

        assert_eq!(Duration::from_secs(1), builder.timeout);
        assert_eq!(1, builder.max_retries);
        assert_eq!(2, builder.max_rate_limit_retries);
        assert_eq!(3, builder.global_limit);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff(1) < backoff(2));
        assert!(backoff(2) < backoff(3));
        assert_eq!(backoff(6), backoff(20));
    }

    #[test]
    fn discord_json_body_is_not_a_cloudflare_ban() {
        let body = br#"{"message":"You are being rate limited.","retry_after":0.5,"global":false}"#;

        assert!(!is_cloudflare_ban(body));
    }

    #[test]
    fn html_challenge_body_is_a_cloudflare_ban() {
        let body = b"<html><head><title>Access denied | discord.com used Cloudflare to restrict access</title></head><body>error code: 1015</body></html>";

        assert!(is_cloudflare_ban(body));
    }

    #[test]
    fn empty_body_is_not_a_cloudflare_ban() {
        assert!(!is_cloudflare_ban(b""));
    }

    #[test]
    fn empty_query_encodes_to_nothing() {
        assert_eq!("", encode_query(&[]));
    }

    #[test]
    fn query_pairs_are_percent_encoded_and_joined() {
        let query = encode_query(&[("limit", "50"), ("after", "a b")]);

        assert_eq!("?limit=50&after=a%20b", query);
    }

    #[test]
    fn multipart_body_contains_payload_json_and_file_parts() {
        let body = build_multipart("B", Some(br#"{"content":"hi"}"#), &[("a.txt", b"hello")]);
        let body = String::from_utf8(body).unwrap();

        assert!(body.contains("name=\"payload_json\""));
        assert!(body.contains(r#"{"content":"hi"}"#));
        assert!(body.contains("name=\"files[0]\"; filename=\"a.txt\""));
        assert!(body.contains("hello"));
        assert!(body.ends_with("--B--\r\n"));
    }

    #[test]
    fn multipart_body_without_payload_json_only_has_files() {
        let body = build_multipart("B", None, &[("a.txt", b"hello")]);
        let body = String::from_utf8(body).unwrap();

        assert!(!body.contains("payload_json"));
        assert!(body.contains("files[0]"));
    }
}
