//! Backend capability traits.
//!
//! The gateway never talks to a provider directly. It holds one handle per
//! calling convention: a [`Backend`] for the suspendable path and a
//! [`BlockingBackend`] for the calling-thread path. Both point at the same
//! remote service.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::types::{CompletionRequest, CompletionResponse, StreamEvent};

/// A stream of incremental events from an asynchronous backend.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// A lazy, blocking sequence of incremental events.
///
/// Each `next()` blocks until the backend yields the next event. The
/// sequence is finite and ends when the backend ends the stream.
pub type EventIter = Box<dyn Iterator<Item = Result<StreamEvent>> + Send>;

/// A backend reachable through the asynchronous calling convention.
///
/// Implementations handle the protocol details for a specific provider
/// (authentication, request encoding, response parsing). See
/// [`AnthropicBackend`](crate::anthropic::AnthropicBackend).
///
/// # Example
///
/// ```rust,ignore
/// use scribe_llm::{Backend, CompletionRequest, format_conversation};
///
/// async fn ask(backend: &dyn Backend) -> scribe_llm::Result<String> {
///     let request = CompletionRequest::new(
///         "claude-3-5-sonnet-20241022",
///         format_conversation("What is 2+2?", None),
///     );
///     let response = backend.complete(&request).await?;
///     Ok(response.text()?.to_owned())
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the backend name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Execute a single-shot completion.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`](crate::error::GatewayError) if the request
    /// fails due to network issues, authentication problems, rate limiting,
    /// or invalid responses.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Open a streaming completion.
    ///
    /// Errors before the stream opens are returned directly; errors after
    /// that are yielded as stream items.
    async fn stream(&self, request: &CompletionRequest) -> Result<EventStream>;
}

/// A backend reachable through the blocking calling convention.
pub trait BlockingBackend: Send + Sync {
    /// Returns the backend name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Execute a single-shot completion on the calling thread.
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Open a streaming completion whose events are read lazily.
    fn stream(&self, request: &CompletionRequest) -> Result<EventIter>;
}
