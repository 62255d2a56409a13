//! HTTP answer provider

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result, ValidationReason},
    providers::{AnswerProvider, HistoryProvider},
    stream::{StreamEventStream, normalize},
    types::{ChatRequest, ChatResponse, FactCheckRequest, RemoteConversation, RemoteMessage, Route},
};

/// Client for the question-answering service
pub struct HttpAnswerProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnswerProvider {
    /// Create a provider for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create with a preconfigured reqwest client
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: Route, path: &str) -> String {
        match route {
            Route::Authenticated => format!("{}{}", self.base_url, path),
            Route::Guest => format!("{}/guest{}", self.base_url, path),
        }
    }

    fn post(&self, url: &str, auth_token: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn open_stream(&self, request: reqwest::RequestBuilder) -> Result<StreamEventStream> {
        let response = request.header("accept", "text/event-stream").send().await?;
        let response = check_status(response).await?;
        Ok(Box::pin(normalize(response.bytes_stream())))
    }
}

/// Read a failed response into a classified error, pass successful ones through
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status.as_u16(), &body))
}

/// Map a non-success status and its body to an error
pub fn error_for_status(status: u16, body: &str) -> Error {
    let message = extract_message(body);
    match status {
        401 | 403 => Error::Unauthorized { status, message },
        404 => Error::NotFound(message),
        400 | 422 => {
            let reason = if mentions_missing_image(body) {
                ValidationReason::MissingImageReference
            } else {
                ValidationReason::Other
            };
            Error::validation(reason, message)
        }
        _ => Error::Status { status, message },
    }
}

fn mentions_missing_image(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("image_url")
        || lower.contains("imageurl")
        || lower.contains("image url")
        || lower.contains("missing_image")
        || lower.contains("image reference")
}

fn extract_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "detail", alias = "error")]
        message: serde_json::Value,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { message }) => message.to_string(),
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no details".to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        }
    }
}

#[derive(Serialize)]
struct UploadRequest {
    image: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(alias = "image_url", alias = "url")]
    image_url: String,
}

#[async_trait]
impl AnswerProvider for HttpAnswerProvider {
    async fn ask(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = self.url(request.route, "/chat");
        let response = self
            .post(&url, request.auth_token.as_deref())
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<StreamEventStream> {
        let url = self.url(request.route, "/chat/stream");
        tracing::debug!("Opening chat stream at {}", url);
        self.open_stream(self.post(&url, request.auth_token.as_deref()).json(request))
            .await
    }

    async fn stream_fact_check(&self, request: &FactCheckRequest) -> Result<StreamEventStream> {
        let url = self.url(request.route, "/fact-check/stream");
        tracing::debug!(
            "Opening fact-check stream at {} (image attached: {})",
            url,
            request.image_url.is_some()
        );
        self.open_stream(self.post(&url, request.auth_token.as_deref()).json(request))
            .await
    }

    async fn upload_image(&self, image: &[u8], auth_token: Option<&str>) -> Result<String> {
        let url = format!("{}/ocr/upload", self.base_url);
        let body = UploadRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
        };
        let response = self.post(&url, auth_token).json(&body).send().await?;
        let response = check_status(response).await?;
        let uploaded: UploadResponse = response.json().await?;
        Ok(uploaded.image_url)
    }
}

#[async_trait]
impl HistoryProvider for HttpAnswerProvider {
    async fn list_conversations(&self, auth_token: &str) -> Result<Vec<RemoteConversation>> {
        let url = format!("{}/conversations", self.base_url);
        let response = self.client.get(&url).bearer_auth(auth_token).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn fetch_messages(
        &self,
        auth_token: &str,
        thread_id: &str,
    ) -> Result<Vec<RemoteMessage>> {
        let url = format!("{}/conversations/{}/messages", self.base_url, thread_id);
        let response = self.client.get(&url).bearer_auth(auth_token).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_unauthorized() {
        let e = error_for_status(401, r#"{"detail":"Token expired"}"#);
        assert!(e.requires_sign_in());
        assert_eq!(e.to_string(), "Not authorized (401): Token expired");
        assert!(error_for_status(403, "").requires_sign_in());
    }

    #[test]
    fn test_status_missing_image() {
        let e = error_for_status(
            422,
            r#"{"detail":[{"loc":["body","image_url"],"msg":"field required"}]}"#,
        );
        assert!(e.is_missing_image_reference());
    }

    #[test]
    fn test_status_other_validation() {
        let e = error_for_status(400, r#"{"message":"reviewed text is empty"}"#);
        assert!(matches!(
            e,
            Error::Validation {
                reason: ValidationReason::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_status_not_found_and_server() {
        assert!(matches!(error_for_status(404, "gone"), Error::NotFound(m) if m == "gone"));
        let e = error_for_status(503, "");
        assert!(e.is_transport());
        assert_eq!(e.to_string(), "Provider error (503): no details");
    }

    #[test]
    fn test_guest_routes() {
        let provider = HttpAnswerProvider::new("https://api.example.org/");
        assert_eq!(provider.base_url(), "https://api.example.org");
        assert_eq!(
            provider.url(Route::Guest, "/chat/stream"),
            "https://api.example.org/guest/chat/stream"
        );
        assert_eq!(
            provider.url(Route::Authenticated, "/chat/stream"),
            "https://api.example.org/chat/stream"
        );
    }
}
