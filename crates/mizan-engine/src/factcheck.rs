//! Fact-check image resolution with a single bounded retry.

use mizan_ai::{FactCheckRequest, StreamEventStream, providers::AnswerProvider};

use crate::error::{Error, Result};

/// Opens fact-check streams, uploading the captured image only when the
/// server asks for it.
///
/// Once an upload-then-retry cycle succeeds, later requests from the same
/// resolver upload first. The flag clears again as soon as a request
/// succeeds without an uploaded image.
#[derive(Debug, Default)]
pub struct FactCheckResolver {
    requires_image_url: bool,
}

impl FactCheckResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the server has been seen to require an image URL
    pub fn requires_image_url(&self) -> bool {
        self.requires_image_url
    }

    /// Open a fact-check stream for `request`.
    ///
    /// Performs at most one upload and at most two stream requests.
    pub async fn open(
        &mut self,
        provider: &dyn AnswerProvider,
        request: &FactCheckRequest,
        image: Option<&[u8]>,
    ) -> Result<StreamEventStream> {
        if image.is_some_and(|bytes| bytes.is_empty()) {
            return Err(Error::EmptyImage);
        }
        let token = request.auth_token.as_deref();

        let mut attempt = request.clone();
        let mut uploaded = false;
        if self.requires_image_url {
            if let Some(bytes) = image {
                let url = provider.upload_image(bytes, token).await?;
                tracing::debug!("Uploaded fact-check image up front: {}", url);
                attempt = request.with_image_url(url);
                uploaded = true;
            }
        }

        match provider.stream_fact_check(&attempt).await {
            Ok(stream) => {
                if !uploaded && self.requires_image_url {
                    tracing::debug!("Fact-check succeeded without an image; clearing upload-first");
                    self.requires_image_url = false;
                }
                Ok(stream)
            }
            Err(e) if e.is_missing_image_reference() && !uploaded => {
                let Some(bytes) = image else {
                    return Err(e.into());
                };
                tracing::warn!("Server requires an image reference; uploading and retrying once");
                let url = provider.upload_image(bytes, token).await?;
                let stream = provider
                    .stream_fact_check(&request.with_image_url(url))
                    .await?;
                self.requires_image_url = true;
                Ok(stream)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mizan_ai::{
        ChatRequest, ChatResponse, StreamEvent, ValidationReason, providers::AnswerProvider,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Copy)]
    enum Mode {
        /// Every request fails with a missing-image validation error
        AlwaysMissingImage,
        /// Requests without an image URL fail with a missing-image error
        RequireImageUrl,
        AcceptAll,
        ServerError,
    }

    struct MockProvider {
        mode: Mode,
        requests: AtomicU32,
        uploads: AtomicU32,
    }

    impl MockProvider {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                requests: AtomicU32::new(0),
                uploads: AtomicU32::new(0),
            }
        }

        fn counts(&self) -> (u32, u32) {
            (
                self.requests.load(Ordering::SeqCst),
                self.uploads.load(Ordering::SeqCst),
            )
        }
    }

    fn missing_image() -> mizan_ai::Error {
        mizan_ai::Error::validation(ValidationReason::MissingImageReference, "image_url is required")
    }

    fn done_stream() -> StreamEventStream {
        Box::pin(async_stream::stream! {
            yield StreamEvent::Done { final_answer: Some("checked".into()), sources: vec![] };
        })
    }

    #[async_trait]
    impl AnswerProvider for MockProvider {
        async fn ask(&self, _request: &ChatRequest) -> mizan_ai::Result<ChatResponse> {
            Err(mizan_ai::Error::InvalidConfig("not used".into()))
        }

        async fn stream_chat(&self, _request: &ChatRequest) -> mizan_ai::Result<StreamEventStream> {
            Err(mizan_ai::Error::InvalidConfig("not used".into()))
        }

        async fn stream_fact_check(
            &self,
            request: &FactCheckRequest,
        ) -> mizan_ai::Result<StreamEventStream> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::AlwaysMissingImage => Err(missing_image()),
                Mode::RequireImageUrl if request.image_url.is_none() => Err(missing_image()),
                Mode::RequireImageUrl | Mode::AcceptAll => Ok(done_stream()),
                Mode::ServerError => Err(mizan_ai::Error::Status {
                    status: 503,
                    message: "unavailable".into(),
                }),
            }
        }

        async fn upload_image(
            &self,
            _image: &[u8],
            _auth_token: Option<&str>,
        ) -> mizan_ai::Result<String> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://cdn.example/img-{}.png", n))
        }
    }

    fn request() -> FactCheckRequest {
        FactCheckRequest {
            reviewed_text: "claim".into(),
            ..Default::default()
        }
    }

    const IMAGE: &[u8] = b"\x89PNG fake";

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let provider = MockProvider::new(Mode::AlwaysMissingImage);
        let mut resolver = FactCheckResolver::new();

        let result = resolver.open(&provider, &request(), Some(IMAGE)).await;
        let err = result.err().unwrap();
        assert!(matches!(&err, Error::Ai(e) if e.is_missing_image_reference()));
        assert_eq!(provider.counts(), (2, 1));
        assert!(!resolver.requires_image_url());
    }

    #[tokio::test]
    async fn test_successful_retry_sets_upload_first() {
        let provider = MockProvider::new(Mode::RequireImageUrl);
        let mut resolver = FactCheckResolver::new();

        assert!(resolver.open(&provider, &request(), Some(IMAGE)).await.is_ok());
        assert_eq!(provider.counts(), (2, 1));
        assert!(resolver.requires_image_url());

        // Upload first, no false start.
        assert!(resolver.open(&provider, &request(), Some(IMAGE)).await.is_ok());
        assert_eq!(provider.counts(), (3, 2));
        assert!(resolver.requires_image_url());
    }

    #[tokio::test]
    async fn test_success_without_image_clears_flag() {
        let provider = MockProvider::new(Mode::AcceptAll);
        let mut resolver = FactCheckResolver {
            requires_image_url: true,
        };

        assert!(resolver.open(&provider, &request(), None).await.is_ok());
        assert!(!resolver.requires_image_url());
        assert_eq!(provider.counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_empty_image_never_reaches_network() {
        let provider = MockProvider::new(Mode::AcceptAll);
        let mut resolver = FactCheckResolver::new();

        let result = resolver.open(&provider, &request(), Some(&[])).await;
        assert!(matches!(result, Err(Error::EmptyImage)));
        assert_eq!(provider.counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let provider = MockProvider::new(Mode::ServerError);
        let mut resolver = FactCheckResolver::new();

        let result = resolver.open(&provider, &request(), Some(IMAGE)).await;
        assert!(matches!(result, Err(Error::Ai(mizan_ai::Error::Status { status: 503, .. }))));
        assert_eq!(provider.counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_missing_image_without_capture_is_surfaced() {
        let provider = MockProvider::new(Mode::RequireImageUrl);
        let mut resolver = FactCheckResolver::new();

        let result = resolver.open(&provider, &request(), None).await;
        assert!(result.is_err());
        assert_eq!(provider.counts(), (1, 0));
    }
}
