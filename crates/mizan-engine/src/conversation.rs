//! Conversation and message records.

use chrono::{DateTime, Utc};
use mizan_ai::{ConversationType, RemoteMessage, Source};
use serde::{Deserialize, Serialize};

/// Prefix of client-generated ids for messages not yet persisted
pub const OPTIMISTIC_ID_PREFIX: &str = "local-";

/// A fresh optimistic message id
pub fn optimistic_id() -> String {
    format!("{}{}", OPTIMISTIC_ID_PREFIX, uuid::Uuid::new_v4())
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub is_user_message: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub is_fact_check_message: bool,
}

impl Message {
    /// An optimistic user message shown before the server confirms anything
    pub fn optimistic_user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: optimistic_id(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            is_user_message: true,
            timestamp: Utc::now(),
            sources: vec![],
            image_data: None,
            detected_language: None,
            is_fact_check_message: false,
        }
    }

    /// An assistant draft being assembled from the stream
    pub fn assistant_draft(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_user_message: false,
            ..Self::optimistic_user(conversation_id, content)
        }
    }

    /// A server history entry, keeping the server's id
    pub fn from_remote(
        conversation_id: impl Into<String>,
        remote: RemoteMessage,
        is_fact_check_message: bool,
    ) -> Self {
        Self {
            id: remote.id,
            conversation_id: conversation_id.into(),
            content: remote.content,
            is_user_message: remote.is_user_message,
            timestamp: remote.timestamp,
            sources: remote.sources,
            image_data: None,
            detected_language: None,
            is_fact_check_message,
        }
    }

    /// Whether this message only exists in memory so far
    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(OPTIMISTIC_ID_PREFIX)
    }
}

/// A conversation with its ordered messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Server-side continuity token
    pub thread_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Never round-tripped through the server; lives on-device only
    pub is_local_only: bool,
    #[serde(default)]
    pub conversation_type: ConversationType,
}

impl Conversation {
    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    /// A remote conversation with history must carry a thread id
    pub fn needs_thread_repair(&self) -> bool {
        self.has_messages() && !self.is_local_only && self.thread_id.is_none()
    }

    /// Copy without messages, for callers that only need the header
    pub fn header(&self) -> Self {
        Self {
            messages: vec![],
            ..self.clone()
        }
    }
}

/// Fields for creating a conversation
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub title: String,
    pub thread_id: Option<String>,
    pub is_local_only: bool,
    pub conversation_type: ConversationType,
}

/// Fields for adding a message; the store assigns the persisted id
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub content: String,
    pub is_user_message: bool,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<Source>,
    pub image_data: Option<Vec<u8>>,
    pub detected_language: Option<String>,
    pub is_fact_check_message: bool,
}

impl From<&Message> for NewMessage {
    fn from(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            is_user_message: message.is_user_message,
            timestamp: message.timestamp,
            sources: message.sources.clone(),
            image_data: message.image_data.clone(),
            detected_language: message.detected_language.clone(),
            is_fact_check_message: message.is_fact_check_message,
        }
    }
}

/// Derive a conversation title from its first message.
///
/// Trimmed and cut to `max_chars` characters with a trailing ellipsis.
/// Blank input falls back to `placeholder`.
pub fn derive_title(first_message: &str, max_chars: usize, placeholder: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return placeholder.to_string();
    }
    let mut chars = trimmed.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated.trim_end())
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_ids_are_distinguishable() {
        let msg = Message::optimistic_user("c-1", "hello");
        assert!(msg.is_optimistic());
        assert!(msg.is_user_message);

        let draft = Message::assistant_draft("c-1", "");
        assert!(draft.is_optimistic());
        assert!(!draft.is_user_message);
        assert_ne!(msg.id, draft.id);

        let persisted = Message {
            id: uuid::Uuid::new_v4().to_string(),
            ..msg
        };
        assert!(!persisted.is_optimistic());
    }

    #[test]
    fn test_title_short_message() {
        assert_eq!(derive_title("  What is Islam?  ", 50, "New"), "What is Islam?");
    }

    #[test]
    fn test_title_truncated_with_ellipsis() {
        let long = "a".repeat(51);
        let title = derive_title(&long, 50, "New");
        assert_eq!(title, format!("{}...", "a".repeat(50)));

        let exact = "b".repeat(50);
        assert_eq!(derive_title(&exact, 50, "New"), exact);
    }

    #[test]
    fn test_title_counts_characters_not_bytes() {
        let arabic = "ما هو الإسلام".repeat(5);
        let title = derive_title(&arabic, 50, "New");
        assert!(title.ends_with("..."));
        assert!(title.trim_end_matches("...").chars().count() <= 50);
    }

    #[test]
    fn test_title_blank_uses_placeholder() {
        assert_eq!(derive_title("   \n", 50, "New Conversation"), "New Conversation");
    }

    #[test]
    fn test_needs_thread_repair() {
        let now = Utc::now();
        let mut conv = Conversation {
            id: "c-1".into(),
            thread_id: None,
            title: "t".into(),
            created_at: now,
            updated_at: now,
            messages: vec![],
            is_local_only: false,
            conversation_type: ConversationType::Regular,
        };
        assert!(!conv.needs_thread_repair());

        conv.messages.push(Message::optimistic_user("c-1", "hi"));
        assert!(conv.needs_thread_repair());

        conv.is_local_only = true;
        assert!(!conv.needs_thread_repair());
    }
}
