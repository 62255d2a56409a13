//! Text- and speech-recognition collaborators

use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;
use tokio_stream::Stream;

/// Failures of the text-recognition collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TextRecognitionError {
    #[error("The image could not be read")]
    InvalidImage,
    #[error("No text was found in the image")]
    NoTextFound,
    #[error("Text recognition failed: {0}")]
    RecognitionFailed(String),
}

/// Failures of the speech-recognition collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("Speech recognition permission was denied")]
    PermissionDenied,
    #[error("Microphone permission was denied")]
    MicrophonePermissionDenied,
    #[error("Speech recognition is not available")]
    RecognizerUnavailable,
    #[error("Couldn't start speech recognition")]
    RequestCreationFailed,
    #[error("Speech recognition failed: {0}")]
    RecognitionFailed(String),
}

/// Text read from an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedText {
    pub text: String,
    pub detected_language: Option<String>,
}

/// Extracts text from images
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<RecognizedText, TextRecognitionError>;
}

/// Partial transcripts, each superseding the previous one
pub type TranscriptStream = Pin<Box<dyn Stream<Item = Result<String, SpeechError>> + Send>>;

/// Turns speech into text
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Ask the platform for permission; `false` means denied
    async fn request_permission(&self) -> bool;

    /// Start recording in the given locale
    async fn start_recording(&self, locale: &str) -> Result<TranscriptStream, SpeechError>;
}
