//! Bounded conversation history
//!
//! Holds alternating user/assistant messages. A turn starts with a user
//! message; the history keeps at most `max_turns` turns, dropping the
//! oldest ones first.

use serde::{Deserialize, Serialize};

use crate::llm_types::{Message, Role};

/// Default number of turns kept
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Ordered user/assistant messages, trimmed to the most recent turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    messages: Vec<Message>,
    max_turns: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl History {
    /// Create an empty history keeping at most `max_turns` turns
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Whether the last message is a user message still waiting for a reply
    pub fn has_pending_user(&self) -> bool {
        matches!(self.messages.last(), Some(m) if m.role == Role::User)
    }

    /// Text of the most recent user message
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Append a user message, starting a new turn.
    ///
    /// A pending (unanswered) user message is replaced rather than stacked.
    pub fn push_user(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.has_pending_user() {
            if let Some(last) = self.messages.last_mut() {
                last.content = text;
            }
        } else {
            self.messages.push(Message::user(text));
        }
        self.trim();
    }

    /// Replace the content of the most recent user message.
    ///
    /// Returns false when the history has no user message.
    pub fn replace_last_user(&mut self, text: impl Into<String>) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.role == Role::User) {
            Some(msg) => {
                msg.content = text.into();
                true
            }
            None => false,
        }
    }

    /// Record the assistant reply for the current turn.
    ///
    /// A trailing assistant message is replaced in place, otherwise the
    /// reply is appended.
    pub fn complete_turn(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content = text,
            _ => self.messages.push(Message::assistant(text)),
        }
        self.trim();
    }

    /// Messages up to and including the most recent user message.
    ///
    /// A trailing assistant reply is excluded so that regenerating the
    /// last turn does not show the model its previous answer.
    pub fn prompt_messages(&self) -> Vec<Message> {
        let end = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.messages[..end].to_vec()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn trim(&mut self) {
        let user_turns = self.messages.iter().filter(|m| m.role == Role::User).count();
        if user_turns <= self.max_turns {
            return;
        }

        let mut to_drop = user_turns - self.max_turns;
        let mut cut = 0;
        for (i, msg) in self.messages.iter().enumerate() {
            if msg.role == Role::User {
                if to_drop == 0 {
                    cut = i;
                    break;
                }
                to_drop -= 1;
            }
        }
        self.messages.drain(..cut);
    }
}
