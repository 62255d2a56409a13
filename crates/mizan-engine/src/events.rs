//! Engine event types

use serde::{Deserialize, Serialize};

use crate::{conversation::Message, state::Phase};

/// Change notifications emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A conversation was created for a send
    ConversationCreated {
        conversation_id: String,
        title: String,
        is_local_only: bool,
    },

    /// The active conversation changed (or was cleared)
    ConversationSelected { conversation_id: Option<String> },

    /// The assembly state machine moved to a new phase
    PhaseChanged { phase: Phase },

    /// A message was appended to the visible list
    MessageAdded { message: Message },

    /// A message's content changed in place
    MessageUpdated { message_id: String, content: String },

    /// A message was dropped from the visible list
    MessageRemoved { message_id: String },

    /// An optimistic message received its persisted id
    MessagePersisted {
        optimistic_id: String,
        message_id: String,
    },

    /// The typing indicator turned on (request sent) or off (first content)
    AwaitingFirstChunk { awaiting: bool },

    /// The latest thinking note; `None` clears the indicator
    ThinkingUpdated { text: Option<String> },

    /// A conversation acquired its continuity token
    ThreadIdAssigned {
        conversation_id: String,
        thread_id: String,
    },

    /// The input buffer changed
    InputChanged { text: String },

    /// A failed send put its text back into the input buffer
    InputRestored { text: String },

    /// An answer was fully assembled
    AnswerCompleted { message: Message },

    /// An error surfaced to the user
    Failed { code: String, message: String },

    /// The user needs to sign in again
    SignInRequired,

    /// A scope was refreshed from the server
    Synced { scope: String },
}

impl EngineEvent {
    /// Check if this event ends a send
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::AnswerCompleted { .. } | EngineEvent::Failed { .. }
        )
    }
}
