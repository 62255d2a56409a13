//! Core wire types shared by the provider and the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cited passage backing an answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(alias = "book_title")]
    pub book_title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "volume_number")]
    pub volume_number: Option<u32>,
    #[serde(default, alias = "page_number")]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "source_url")]
    pub source_url: Option<String>,
}

impl Source {
    /// Human-readable citation, e.g. `Sahih al-Bukhari, al-Bukhari, vol. 1, p. 12`
    pub fn citation(&self) -> String {
        let mut parts = vec![self.book_title.clone()];
        if let Some(ref author) = self.author {
            if !author.trim().is_empty() {
                parts.push(author.trim().to_string());
            }
        }
        if let Some(volume) = self.volume_number {
            parts.push(format!("vol. {}", volume));
        }
        if let Some(page) = self.page_number {
            parts.push(format!("p. {}", page));
        }
        parts.join(", ")
    }
}

/// Kind of conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    #[default]
    Regular,
    FactCheck,
}

/// Which endpoint family a request is routed through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    #[default]
    Authenticated,
    /// Guest/ephemeral path: no bearer token, continuity via session id
    Guest,
}

/// Body of a chat request
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Base64-encoded image attached to the question
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_preference: Option<String>,
    pub enable_thinking: bool,
    #[serde(skip)]
    pub route: Route,
    #[serde(skip)]
    pub auth_token: Option<String>,
}

/// Body of a fact-check request
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactCheckRequest {
    pub reviewed_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// URL returned by the OCR upload endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_preference: Option<String>,
    pub enable_thinking: bool,
    #[serde(skip)]
    pub route: Route,
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl FactCheckRequest {
    /// Same request with an uploaded image reference attached
    pub fn with_image_url(&self, url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..self.clone()
        }
    }
}

/// Response of a non-streaming chat call
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default, alias = "thread_id")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// A conversation as listed by the server
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    pub id: String,
    #[serde(default, alias = "thread_id")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "conversation_type")]
    pub conversation_type: ConversationType,
}

/// A message as returned by the server's history endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: String,
    pub content: String,
    #[serde(alias = "is_user_message")]
    pub is_user_message: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Source>,
}
