//! The completion gateway.
//!
//! [`Gateway`] offers four request modes over a pair of backend handles:
//!
//! | operation              | convention | admission | retry |
//! |------------------------|------------|-----------|-------|
//! | [`complete_async`]     | async      | yes       | yes   |
//! | [`complete_sync`]      | blocking   | no        | yes   |
//! | [`stream_async`]       | async      | no        | no    |
//! | [`stream_sync`]        | blocking   | no        | no    |
//!
//! [`complete_async`]: Gateway::complete_async
//! [`complete_sync`]: Gateway::complete_sync
//! [`stream_async`]: Gateway::stream_async
//! [`stream_sync`]: Gateway::stream_sync

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::admission::Admission;
use crate::anthropic::{AnthropicBackend, AnthropicBlockingBackend};
use crate::config::{AnthropicConfig, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::provider::{Backend, BlockingBackend, EventIter};
use crate::retry::{RetryConfig, retry_async, retry_blocking};
use crate::types::{CompletionRequest, StreamEvent};

/// Sleep used between blocking retry attempts.
pub type BlockingSleep = Arc<dyn Fn(Duration) + Send + Sync>;

/// Bounded-concurrency, retrying completion gateway.
///
/// # Example
///
/// ```rust,ignore
/// use scribe_llm::{Gateway, GatewayConfig, AnthropicConfig, CompletionRequest, format_conversation};
///
/// let gateway = Gateway::anthropic(AnthropicConfig::default(), GatewayConfig::default())?;
/// let request = CompletionRequest::new(
///     "claude-3-5-sonnet-20241022",
///     format_conversation("What is Rust?", None),
/// );
/// let text = gateway.complete_async(&request).await?;
/// ```
pub struct Gateway {
    backend: Arc<dyn Backend>,
    blocking: Arc<dyn BlockingBackend>,
    admission: Admission,
    retry: RetryConfig,
    sleep: BlockingSleep,
}

impl Gateway {
    /// Build a gateway over an async and a blocking handle to the same service.
    pub fn new(
        backend: Arc<dyn Backend>,
        blocking: Arc<dyn BlockingBackend>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            backend,
            blocking,
            admission: Admission::new(config.in_flight_limit, config.admission_timeout),
            retry: config.retry,
            sleep: Arc::new(std::thread::sleep),
        }
    }

    /// Build a gateway over the Anthropic Messages API.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConfigured`] if the API key environment
    /// variable named by `anthropic.api_key_env` is not set.
    pub fn anthropic(anthropic: AnthropicConfig, config: GatewayConfig) -> Result<Self> {
        let api_key = anthropic.resolve_api_key()?;
        Self::anthropic_with_key(anthropic, api_key, config)
    }

    /// Build a gateway over the Anthropic Messages API with an explicit key.
    pub fn anthropic_with_key(
        anthropic: AnthropicConfig,
        api_key: String,
        config: GatewayConfig,
    ) -> Result<Self> {
        let backend = AnthropicBackend::with_api_key(anthropic.clone(), api_key.clone())?;
        let blocking = AnthropicBlockingBackend::with_api_key(anthropic, api_key)?;
        Ok(Self::new(Arc::new(backend), Arc::new(blocking), config))
    }

    /// Replace the sleep used between blocking retries.
    pub fn with_blocking_sleep<F>(mut self, sleep: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Number of asynchronous completions currently admitted.
    pub fn in_flight(&self) -> usize {
        self.admission.in_flight()
    }

    pub fn in_flight_limit(&self) -> usize {
        self.admission.limit()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Complete `request` on the async runtime and return the generated text.
    ///
    /// Each attempt first waits for an admission slot. Transient failures are
    /// retried with backoff; the slot is released between attempts.
    pub async fn complete_async(&self, request: &CompletionRequest) -> Result<String> {
        self.complete_async_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// [`complete_async`](Self::complete_async) with a cancellation token.
    ///
    /// Cancelling interrupts the admission wait, the backend call and the
    /// backoff sleep, and returns [`GatewayError::Cancelled`].
    pub async fn complete_async_with_cancel(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        request.validate()?;
        retry_async(&self.retry, cancel, "complete_async", |attempt| {
            self.attempt_async(request, cancel, attempt)
        })
        .await
    }

    async fn attempt_async(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<String> {
        let _permit = self.admission.acquire(cancel).await?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            res = self.backend.complete(request) => res,
        };

        match outcome {
            Ok(response) => Ok(response.text()?.to_owned()),
            Err(err) => {
                warn!(
                    backend = %self.backend.name(),
                    attempt,
                    error = %err,
                    "completion attempt failed"
                );
                Err(err)
            }
        }
    }

    /// Complete `request` on the calling thread and return the generated text.
    ///
    /// Not subject to admission control. Same retry policy as
    /// [`complete_async`](Self::complete_async).
    pub fn complete_sync(&self, request: &CompletionRequest) -> Result<String> {
        request.validate()?;
        retry_blocking(
            &self.retry,
            "complete_sync",
            |_| {
                let response = self.blocking.complete(request)?;
                Ok(response.text()?.to_owned())
            },
            |delay| (self.sleep)(delay),
        )
    }

    /// Stream `request`, passing every event to `sink` in arrival order.
    ///
    /// The next event is read only after `sink` returns. Not retried: a
    /// failure mid-stream is returned as is, and events already passed to
    /// `sink` stay delivered.
    pub async fn stream_async<F>(&self, request: &CompletionRequest, mut sink: F) -> Result<()>
    where
        F: FnMut(StreamEvent),
    {
        request.validate()?;
        let mut events = self.backend.stream(request).await?;

        let mut delivered = 0usize;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    trace!(?event, "stream event");
                    sink(event);
                    delivered += 1;
                }
                Err(err) => {
                    warn!(
                        backend = %self.backend.name(),
                        delivered,
                        error = %err,
                        "stream failed"
                    );
                    return Err(err);
                }
            }
        }

        debug!(backend = %self.backend.name(), delivered, "stream complete");
        Ok(())
    }

    /// Stream `request` as a lazy blocking iterator.
    ///
    /// Errors opening the stream are returned directly. A failure after that
    /// is yielded once as an `Err` item, after which the iterator ends.
    pub fn stream_sync(&self, request: &CompletionRequest) -> Result<EventIter> {
        request.validate()?;
        let events = self.blocking.stream(request)?;
        Ok(Box::new(events.scan(false, |failed, item| {
            if *failed {
                return None;
            }
            *failed = item.is_err();
            Some(item)
        })))
    }

    /// Close admission. Waiting and future asynchronous completions fail
    /// with [`GatewayError::Shutdown`].
    pub fn shutdown(&self) {
        self.admission.close();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("backend", &self.backend.name())
            .field("in_flight", &self.in_flight())
            .field("in_flight_limit", &self.in_flight_limit())
            .field("retry", &self.retry)
            .finish()
    }
}
