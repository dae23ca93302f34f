//! Bounded-concurrency, retrying completion gateway for scribe.
//!
//! This crate wraps a text-generation backend behind one [`Gateway`] that
//! offers blocking, async and streaming completions with retry and
//! admission control.
//!
//! # Architecture
//!
//! - [`Backend`] / [`BlockingBackend`] define the capability a provider must offer
//! - [`AnthropicBackend`] / [`AnthropicBlockingBackend`] implement it for the Messages API
//! - [`Gateway`] adds admission control and retry on top of a backend pair
//! - [`Conversation`] keeps the system instruction apart from the turns
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use scribe_llm::{AnthropicConfig, CompletionRequest, Gateway, GatewayConfig, format_conversation};
//!
//! let gateway = Gateway::anthropic(AnthropicConfig::default(), GatewayConfig::default())?;
//! let request = CompletionRequest::new(
//!     "claude-3-5-sonnet-20241022",
//!     format_conversation("What is Rust?", Some("Answer in one sentence.")),
//! );
//!
//! let text = gateway.complete_async(&request).await?;
//! println!("{text}");
//! ```

pub mod admission;
pub mod anthropic;
pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod retry;
pub mod sse;
pub mod types;

pub use admission::Admission;
pub use anthropic::{AnthropicBackend, AnthropicBlockingBackend};
pub use config::{AnthropicConfig, GatewayConfig, GatewaySettings, Settings};
pub use conversation::{
    Conversation, DEFAULT_SYSTEM_PROMPT, Role, Turn, format_conversation,
    format_conversation_from_buffer,
};
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::Gateway;
pub use provider::{Backend, BlockingBackend, EventIter, EventStream};
pub use retry::{RetryConfig, is_retryable};
pub use types::{CompletionRequest, CompletionResponse, ContentBlock, StreamEvent, Usage};

pub use tokio_util::sync::CancellationToken;
