use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, Method, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Number of attempts made before a timing-out request is given up.
pub const MAX_TRIES_TO_FETCH: u32 = 10;

/// Per-request timeout used when the fetcher builds its own client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed delay between two timed out attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Retry and timeout settings for [`ResilientFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Applied to the `reqwest::Client` built by [`ResilientFetcher::with_config`].
    pub timeout: Duration,
    /// Default attempt budget, overridable per request.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: MAX_TRIES_TO_FETCH,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Coarse classification of non-timeout transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    Connect,
    Redirect,
    Request,
    Body,
    Decode,
    Builder,
    Other,
}

impl ClientErrorKind {
    fn classify(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            ClientErrorKind::Connect
        } else if err.is_redirect() {
            ClientErrorKind::Redirect
        } else if err.is_body() {
            ClientErrorKind::Body
        } else if err.is_decode() {
            ClientErrorKind::Decode
        } else if err.is_builder() {
            ClientErrorKind::Builder
        } else if err.is_request() {
            ClientErrorKind::Request
        } else {
            ClientErrorKind::Other
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientErrorKind::Connect => "connection",
            ClientErrorKind::Redirect => "redirect",
            ClientErrorKind::Request => "request",
            ClientErrorKind::Body => "body",
            ClientErrorKind::Decode => "decode",
            ClientErrorKind::Builder => "builder",
            ClientErrorKind::Other => "transport",
        };
        f.write_str(name)
    }
}

/// A single request to issue through [`ResilientFetcher::fetch`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: String,
    method: Method,
    headers: HeaderMap,
    streaming: bool,
    max_attempts: Option<u32>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            streaming: false,
            max_attempts: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Restrict the request to the inclusive byte range `start..=end`.
    ///
    /// Ranged requests always bypass caches and expect `206 Partial Content`.
    pub fn range(self, start: u64, end: u64) -> Self {
        let range = HeaderValue::from_str(&format!("bytes={start}-{end}"))
            .unwrap_or_else(|_| HeaderValue::from_static("bytes=0-"));
        self.header(RANGE, range)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
    }

    /// Hand the body back as a chunk stream instead of buffering it.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_ranged(&self) -> bool {
        self.headers.contains_key(RANGE)
    }

    fn expected_status(&self) -> StatusCode {
        if self.is_ranged() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }
}

/// Body of a successful response.
pub enum FetchBody {
    Buffered(Bytes),
    /// Finite, not restartable sequence of chunks.
    Streaming(BoxStream<'static, Result<Bytes>>),
}

impl fmt::Debug for FetchBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchBody::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            FetchBody::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Status, headers and body of a request that returned the expected status.
#[derive(Debug)]
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: FetchBody,
}

impl FetchResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header_str(CONTENT_LENGTH).and_then(|s| s.trim().parse().ok())
    }

    pub fn accepts_ranges(&self) -> bool {
        self.header_str(ACCEPT_RANGES)
            .unwrap_or("none")
            .contains("bytes")
    }

    /// Collect the whole body, draining the stream if the request was streamed.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            FetchBody::Buffered(bytes) => Ok(bytes),
            FetchBody::Streaming(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await?;
                Ok(chunks.concat().into())
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self.body {
            FetchBody::Buffered(bytes) => futures::stream::once(async move { Ok(bytes) }).boxed(),
            FetchBody::Streaming(stream) => stream,
        }
    }
}

/// Result of [`ResilientFetcher::fetch`].
#[derive(Debug)]
pub enum FetchOutcome {
    Success(FetchResponse),
    /// The server answered 404: there is no data, which is not an error.
    NotFound,
    /// Any status other than the expected one and 404.
    ServerError(StatusCode),
    /// A transport failure other than a timeout.
    ClientError { kind: ClientErrorKind, message: String },
    /// Every attempt timed out.
    RetryExhausted { attempts: u32 },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    /// Convert into the crate error taxonomy. `NotFound` maps to `Ok(None)`.
    pub fn into_result(self, url: &str) -> Result<Option<FetchResponse>> {
        match self {
            FetchOutcome::Success(response) => Ok(Some(response)),
            FetchOutcome::NotFound => Ok(None),
            FetchOutcome::ServerError(status) => Err(Error::RemoteStatus {
                url: url.to_string(),
                status,
            }),
            FetchOutcome::ClientError { kind, message } => Err(Error::Transport {
                url: url.to_string(),
                kind,
                message,
            }),
            FetchOutcome::RetryExhausted { attempts } => Err(Error::RetryExhausted {
                url: url.to_string(),
                attempts,
            }),
        }
    }

    /// Like [`into_result`](Self::into_result) but treats absence as an error.
    pub fn into_response(self, url: &str) -> Result<FetchResponse> {
        self.into_result(url)?.ok_or_else(|| Error::NotFound {
            url: url.to_string(),
        })
    }
}

enum Attempt {
    Done(FetchOutcome),
    TimedOut(reqwest::Error),
}

/// Issues HTTP requests, retrying only on timeouts.
///
/// The `reqwest::Client` is always supplied by the caller, so connection
/// pooling and limits are shared by whoever owns the client.
#[derive(Debug, Clone)]
pub struct ResilientFetcher {
    client: Client,
    config: FetcherConfig,
}

impl ResilientFetcher {
    pub fn new(client: Client, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    /// Build a client whose timeout follows `config`.
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport {
                url: String::new(),
                kind: ClientErrorKind::classify(&e),
                message: e.to_string(),
            })?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issue `request`, retrying while attempts time out.
    ///
    /// A timed out attempt is retried after the configured backoff until the
    /// attempt budget (per request, or [`FetcherConfig::max_attempts`]) is
    /// spent. Every other result ends the call at once.
    ///
    /// # Arguments
    ///
    /// * `request` - The request to send; ranged requests expect `206`
    ///
    /// # Returns
    ///
    /// - [`FetchOutcome::Success`] when the expected status came back
    /// - [`FetchOutcome::NotFound`] on `404`
    /// - [`FetchOutcome::ServerError`] on any other status
    /// - [`FetchOutcome::ClientError`] on a transport failure that is not a timeout
    /// - [`FetchOutcome::RetryExhausted`] when every attempt timed out
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.config.max_attempts)
            .max(1);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(request).await {
                Attempt::Done(outcome) => return outcome,
                Attempt::TimedOut(err) => {
                    if attempts >= max_attempts {
                        warn!(url = %request.url, attempts, "failed to fetch, skipping: {err}");
                        return FetchOutcome::RetryExhausted { attempts };
                    }
                    tokio::time::sleep(self.config.backoff).await;
                    debug!(
                        url = %request.url,
                        "retrying ({attempts} failed attempt{})",
                        if attempts == 1 { "" } else { "s" }
                    );
                }
            }
        }
    }

    async fn attempt(&self, request: &FetchRequest) -> Attempt {
        let result = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Attempt::TimedOut(e),
            Err(e) => {
                error!(url = %request.url, "error while requesting: {e}");
                return Attempt::Done(FetchOutcome::ClientError {
                    kind: ClientErrorKind::classify(&e),
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Attempt::Done(FetchOutcome::NotFound);
        }
        if status != request.expected_status() {
            error!(url = %request.url, %status, "unexpected status received");
            return Attempt::Done(FetchOutcome::ServerError(status));
        }

        let headers = response.headers().clone();
        let body = if request.streaming {
            let url = request.url.clone();
            let stream = response
                .bytes_stream()
                .map_err(move |e| Error::Transport {
                    url: url.clone(),
                    kind: ClientErrorKind::Body,
                    message: e.to_string(),
                })
                .boxed();
            FetchBody::Streaming(stream)
        } else {
            match response.bytes().await {
                Ok(bytes) => FetchBody::Buffered(bytes),
                Err(e) if e.is_timeout() => return Attempt::TimedOut(e),
                Err(e) => {
                    error!(url = %request.url, "error while reading body: {e}");
                    return Attempt::Done(FetchOutcome::ClientError {
                        kind: ClientErrorKind::classify(&e),
                        message: e.to_string(),
                    });
                }
            }
        };

        Attempt::Done(FetchOutcome::Success(FetchResponse {
            status,
            headers,
            body,
        }))
    }
}
