//! Conversations: a system instruction plus an ordered list of turns.
//!
//! The system instruction is kept out of the turn list. It logically comes
//! first, but backends receive it as its own field.

use serde::{Deserialize, Serialize};

/// System instruction used when the caller does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// The author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One role-tagged message within a conversation.
///
/// Extra keys present in a serialized buffer entry are ignored on
/// deserialization; only `role` and `content` are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A logical element of a conversation, in transmission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Element<'a> {
    System(&'a str),
    Turn(&'a Turn),
}

/// A system instruction plus the ordered turns sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub system: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty conversation with the given system instruction.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: Turn) -> &mut Self {
        self.turns.push(turn);
        self
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Turn::user(content))
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Turn::assistant(content))
    }

    /// The system instruction followed by every turn, in order.
    pub fn elements(&self) -> impl Iterator<Item = Element<'_>> {
        std::iter::once(Element::System(self.system.as_str()))
            .chain(self.turns.iter().map(Element::Turn))
    }
}

/// Build a one-turn conversation from a user prompt.
///
/// `None` for `system_text` selects [`DEFAULT_SYSTEM_PROMPT`].
pub fn format_conversation(user_text: impl Into<String>, system_text: Option<&str>) -> Conversation {
    let mut conversation = Conversation::new(system_text.unwrap_or(DEFAULT_SYSTEM_PROMPT));
    conversation.push_user(user_text);
    conversation
}

/// Build a conversation from an existing ordered buffer of turns.
///
/// `None` for `system_text` selects [`DEFAULT_SYSTEM_PROMPT`].
pub fn format_conversation_from_buffer<I>(turns: I, system_text: Option<&str>) -> Conversation
where
    I: IntoIterator<Item = Turn>,
{
    Conversation {
        system: system_text.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_owned(),
        turns: turns.into_iter().collect(),
    }
}
