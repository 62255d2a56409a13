//! Answer provider contracts and the HTTP implementation

pub mod http;

use crate::{
    ChatRequest, ChatResponse, Error, FactCheckRequest, RemoteConversation, RemoteMessage, Result,
    StreamEventStream,
};
use async_trait::async_trait;

pub use http::HttpAnswerProvider;

/// Chat and fact-check endpoints of the question-answering service
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    /// Ask a question and wait for the whole answer
    async fn ask(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Ask a question and stream the answer
    async fn stream_chat(&self, request: &ChatRequest) -> Result<StreamEventStream>;

    /// Fact-check a text, optionally referencing an uploaded image
    async fn stream_fact_check(&self, request: &FactCheckRequest) -> Result<StreamEventStream>;

    /// Upload an image through the OCR endpoint and return its URL
    async fn upload_image(&self, image: &[u8], auth_token: Option<&str>) -> Result<String>;
}

/// Server-side conversation history for signed-in users
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// List the user's conversations
    async fn list_conversations(&self, auth_token: &str) -> Result<Vec<RemoteConversation>>;

    /// Fetch the messages of one conversation, keyed by its thread id
    async fn fetch_messages(&self, auth_token: &str, thread_id: &str)
    -> Result<Vec<RemoteMessage>>;
}

/// Get an auth token from the provided value or the environment
pub fn get_auth_token(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(token) = provided {
        return Ok(token.to_string());
    }

    std::env::var(env_var)
        .map_err(|_| Error::InvalidConfig(format!("no auth token provided and {} is unset", env_var)))
}
