//! Anthropic Messages API backends.
//!
//! [`AnthropicBackend`] serves the asynchronous calling convention and
//! [`AnthropicBlockingBackend`] the blocking one. Both send the system
//! instruction as the top-level `system` field and the turns as `messages`.

use std::io::BufReader;
use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AnthropicConfig;
use crate::conversation::Turn;
use crate::error::{GatewayError, Result};
use crate::provider::{Backend, BlockingBackend, EventIter, EventStream};
use crate::sse::{SseEventIter, decode_event_stream};
use crate::types::{CompletionRequest, CompletionResponse};

const BACKEND_NAME: &str = "anthropic";

/// Request body for `POST /messages`.
#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Turn],
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> MessagesBody<'a> {
    fn new(request: &'a CompletionRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: &request.conversation.system,
            messages: &request.conversation.turns,
            temperature: request.temperature,
            stream,
        }
    }
}

fn messages_url(config: &AnthropicConfig) -> String {
    let base = config.base_url.trim_end_matches('/');
    format!("{base}/messages")
}

/// Headers sent with every request. The API key is marked sensitive.
fn default_headers(config: &AnthropicConfig, api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let mut key = HeaderValue::from_str(api_key)
        .map_err(|_| GatewayError::NotConfigured("API key is not a valid header value".into()))?;
    key.set_sensitive(true);
    headers.insert(HeaderName::from_static("x-api-key"), key);

    let version = HeaderValue::from_str(&config.api_version).map_err(|_| {
        GatewayError::NotConfigured(format!("invalid api_version '{}'", config.api_version))
    })?;
    headers.insert(HeaderName::from_static("anthropic-version"), version);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (k, v) in &config.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| GatewayError::NotConfigured(format!("invalid header name '{k}'")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|_| GatewayError::NotConfigured(format!("invalid value for header '{k}'")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

fn require_key(api_key: String) -> Result<String> {
    if api_key.trim().is_empty() {
        return Err(GatewayError::NotConfigured("API key is empty".into()));
    }
    Ok(api_key)
}

/// A client that cannot be built will not build on a retry either.
fn client_build_error(err: reqwest::Error) -> GatewayError {
    GatewayError::NotConfigured(format!("failed to build HTTP client: {err}"))
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Http(err)
    }
}

/// Decode a fully read `/messages` response body.
fn parse_completion(body: &[u8]) -> Result<CompletionResponse> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidResponse(format!("failed to parse response: {e}")))
}

/// Map a non-success HTTP status and body to an error.
fn status_error(status: u16, body: &str, retry_after_ms: Option<u64>, model: &str) -> GatewayError {
    let message = extract_error_message(body).unwrap_or_else(|| body.to_owned());
    match status {
        400 | 413 | 422 => GatewayError::InvalidRequest(message),
        401 | 403 => GatewayError::AuthFailed(message),
        404 => GatewayError::ModelNotFound(format!("model '{model}': {message}")),
        408 => GatewayError::Timeout,
        429 => GatewayError::RateLimited {
            retry_after_ms: retry_after_ms
                .or_else(|| parse_retry_after_ms(body))
                .unwrap_or(1000),
        },
        529 => GatewayError::Overloaded(message),
        500..=599 => GatewayError::ServerError { status, message },
        _ => GatewayError::RequestFailed(format!("HTTP {status}: {message}")),
    }
}

/// Extract a human-readable error message from a JSON error body.
///
/// The Messages API uses `{"type":"error","error":{"type":..,"message":..}}`.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error").and_then(|v| {
        v.get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .or_else(|| v.as_str().map(String::from))
    })
}

/// Retry hint from the `retry-after` header, in milliseconds.
///
/// Only the numeric (seconds) form is handled; HTTP-date values are ignored.
fn parse_retry_after_header(headers: &HeaderMap) -> Option<u64> {
    let secs: f64 = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())?
        .trim()
        .parse()
        .ok()?;
    Some((secs * 1000.0).max(0.0) as u64)
}

/// Retry hint from a JSON error body, in milliseconds.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}

// ── Async backend ───────────────────────────────────────────────────────

/// Anthropic backend for the asynchronous calling convention.
pub struct AnthropicBackend {
    config: AnthropicConfig,
    url: String,
    http: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a backend, reading the API key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConfigured`] if the key is missing.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Self::with_api_key(config, api_key)
    }

    /// Create a backend with an explicit API key.
    pub fn with_api_key(config: AnthropicConfig, api_key: String) -> Result<Self> {
        let api_key = require_key(api_key)?;
        let mut builder =
            reqwest::Client::builder().default_headers(default_headers(&config, &api_key)?);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            url: messages_url(&config),
            http: builder.build().map_err(client_build_error)?,
            config,
        })
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        debug!(
            backend = BACKEND_NAME,
            model = %request.model,
            turns = request.conversation.turns.len(),
            stream,
            "sending messages request"
        );

        let mut builder = self.http.post(&self.url);
        if stream {
            builder = builder.header("accept", "text/event-stream");
        }
        let response = builder
            .json(&MessagesBody::new(request, stream))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        warn!(
            backend = BACKEND_NAME,
            status = status.as_u16(),
            body = %body,
            "messages request rejected"
        );
        Err(status_error(status.as_u16(), &body, retry_after, &request.model))
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(request, false).await?;
        let body = response.bytes().await.map_err(transport_error)?;
        let completion = parse_completion(&body)?;

        debug!(
            backend = BACKEND_NAME,
            model = %completion.model,
            blocks = completion.content.len(),
            "messages response received"
        );
        Ok(completion)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<EventStream> {
        let response = self.send(request, true).await?;
        Ok(decode_event_stream(response.bytes_stream()))
    }
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.config.base_url)
            .field("api_key", &"***")
            .finish()
    }
}

// ── Blocking backend ────────────────────────────────────────────────────

/// Anthropic backend for the blocking calling convention.
///
/// The blocking HTTP client is created on first use, so this backend can be
/// constructed (and dropped unused) inside an async runtime. Calls must be
/// made from a thread that is not driving a runtime.
pub struct AnthropicBlockingBackend {
    config: AnthropicConfig,
    url: String,
    headers: HeaderMap,
    http: OnceLock<reqwest::blocking::Client>,
}

impl AnthropicBlockingBackend {
    /// Create a backend, reading the API key from `config.api_key_env`.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Self::with_api_key(config, api_key)
    }

    /// Create a backend with an explicit API key.
    pub fn with_api_key(config: AnthropicConfig, api_key: String) -> Result<Self> {
        let api_key = require_key(api_key)?;
        Ok(Self {
            headers: default_headers(&config, &api_key)?,
            url: messages_url(&config),
            http: OnceLock::new(),
            config,
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.http.get() {
            return Ok(client);
        }
        let mut builder =
            reqwest::blocking::Client::builder().default_headers(self.headers.clone());
        if let Some(timeout) = self.config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(client_build_error)?;
        Ok(self.http.get_or_init(|| client))
    }

    fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::blocking::Response> {
        debug!(
            backend = BACKEND_NAME,
            model = %request.model,
            turns = request.conversation.turns.len(),
            stream,
            "sending blocking messages request"
        );

        let mut builder = self.client()?.post(&self.url);
        if stream {
            builder = builder.header("accept", "text/event-stream");
        }
        let response = builder
            .json(&MessagesBody::new(request, stream))
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after_header(response.headers());
        let body = response.text().unwrap_or_default();
        warn!(
            backend = BACKEND_NAME,
            status = status.as_u16(),
            body = %body,
            "blocking messages request rejected"
        );
        Err(status_error(status.as_u16(), &body, retry_after, &request.model))
    }
}

impl BlockingBackend for AnthropicBlockingBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(request, false)?;
        let body = response.bytes().map_err(transport_error)?;
        parse_completion(&body)
    }

    fn stream(&self, request: &CompletionRequest) -> Result<EventIter> {
        let response = self.send(request, true)?;
        Ok(Box::new(SseEventIter::new(BufReader::new(response))))
    }
}

impl std::fmt::Debug for AnthropicBlockingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBlockingBackend")
            .field("base_url", &self.config.base_url)
            .field("api_key", &"***")
            .finish()
    }
}
