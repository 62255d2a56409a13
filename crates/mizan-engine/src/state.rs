//! Published chat state.

use serde::{Deserialize, Serialize};

use crate::conversation::Message;

/// Phase of the message assembly state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    /// Optimistic user message shown, waiting for the provider
    Sending,
    /// Provider events are arriving
    Streaming,
    /// Writing the finished exchange to the store
    Finalizing,
    /// Rolling back a failed send
    Failed,
}

/// An error as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacedError {
    pub code: String,
    pub message: String,
}

/// Everything a chat screen renders
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    /// Editable input buffer
    pub input: String,
    /// At most one entry: only the latest thinking note is kept
    pub thinking: Vec<String>,
    pub awaiting_first_chunk: bool,
    pub phase: Phase,
    pub error: Option<SurfacedError>,
    pub requires_sign_in: bool,
    /// Language detected from the last recognized image, applied to the next send
    pub detected_language: Option<String>,
}

impl ChatState {
    /// Replace the thinking note
    pub fn set_thinking(&mut self, text: impl Into<String>) {
        self.thinking.clear();
        self.thinking.push(text.into());
    }

    pub fn clear_thinking(&mut self) {
        self.thinking.clear();
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Remove a message, returning whether it was present
    pub fn remove_message(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Swap an optimistic id for the persisted one
    pub fn rename_message(&mut self, from: &str, to: &str) -> bool {
        match self.message_mut(from) {
            Some(message) => {
                message.id = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Show a different conversation
    pub fn select(&mut self, conversation_id: Option<String>, messages: Vec<Message>) {
        self.conversation_id = conversation_id;
        self.messages = messages;
        self.clear_thinking();
        self.awaiting_first_chunk = false;
    }
}
