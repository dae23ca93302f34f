//! Request, response and streaming types for completion calls.
//!
//! Responses and stream events follow the Anthropic Messages API shape:
//! a response carries a list of typed content blocks, and a stream is a
//! sequence of typed events.

use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::error::{GatewayError, Result};

/// Default cap on generated tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.8;

/// A completion request. Operations take it by reference and never modify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The system instruction and turns to send.
    pub conversation: Conversation,

    /// The model identifier (e.g. "claude-3-5-sonnet-20241022").
    pub model: String,

    /// Maximum number of tokens to generate. Must be positive.
    pub max_tokens: u32,

    /// Sampling temperature in `[0, 1]`.
    pub temperature: f64,
}

impl CompletionRequest {
    /// Create a request with the default token cap and temperature.
    pub fn new(model: impl Into<String>, conversation: Conversation) -> Self {
        Self {
            conversation,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Check the request before it reaches a backend.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if the system instruction is
    /// empty, there are no turns, `max_tokens` is zero, the model is empty,
    /// or the temperature is outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.conversation.system.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "conversation has no system instruction".into(),
            ));
        }
        if self.conversation.turns.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "conversation has no turns".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("model is empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(GatewayError::InvalidRequest(
                "max_tokens must be positive".into(),
            ));
        }
        if !self.temperature.is_finite() || !(0.0..=1.0).contains(&self.temperature) {
            return Err(GatewayError::InvalidRequest(format!(
                "temperature {} is outside [0, 1]",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// A finalized completion returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    pub content: Vec<ContentBlock>,

    /// Why generation stopped (e.g. "end_turn", "max_tokens").
    #[serde(default)]
    pub stop_reason: Option<String>,

    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Build a response holding a single text block.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: None,
            usage: None,
        }
    }

    /// The text of the first content block.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidResponse`] if there is no content or
    /// the first block is not text.
    pub fn text(&self) -> Result<&str> {
        match self.content.first() {
            Some(ContentBlock::Text { text }) => Ok(text),
            Some(_) => Err(GatewayError::InvalidResponse(
                "first content block is not text".into(),
            )),
            None => Err(GatewayError::InvalidResponse(
                "response has no content blocks".into(),
            )),
        }
    }
}

/// A typed block of response content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

// ── Streaming types ─────────────────────────────────────────────────────

/// One incremental event from a streaming completion.
///
/// Provider `error` events are not represented here; the decoders in
/// [`sse`](crate::sse) turn them into errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Ping,
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Shorthand for a text delta on block `index`.
    pub fn text_delta(index: usize, text: impl Into<String>) -> Self {
        StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta { text: text.into() },
        }
    }

    /// The generated text carried by this event, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => Some(text),
            _ => None,
        }
    }
}

/// Message metadata sent at the start of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// A partial content update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

/// Top-level message changes sent near the end of a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}
