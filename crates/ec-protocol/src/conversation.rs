//! Conversation types for the Energy Coach chat.

use serde::{Deserialize, Serialize};

/// Role of a turn in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One exchange unit in a conversation.
///
/// Content of an assistant turn is append-only while its response stream is
/// in flight; once the stream settles the turn is left untouched until a new
/// request begins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation history, insertion order = chronological order.
///
/// At most one turn (the trailing assistant turn) receives appended content
/// at any time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new user turn. User turns never merge with a prior turn.
    pub fn submit_user_turn(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    /// Apply an incremental fragment of assistant text.
    ///
    /// Extends the trailing assistant turn if there is one; otherwise a new
    /// assistant turn is appended. This is how repeated deltas during one
    /// response accumulate into a single visible message.
    pub fn apply_assistant_delta(&mut self, text: &str) {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => turn.content.push_str(text),
            _ => self.turns.push(Turn::assistant(text)),
        }
    }

    /// Clear the log. Used for "clear chat".
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Request body for the coach chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoachRequest {
    pub messages: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl CoachRequest {
    pub fn new(messages: Vec<Turn>) -> Self {
        Self {
            messages,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}
