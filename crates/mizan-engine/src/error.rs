//! Error types for mizan-engine

use std::fmt;

use thiserror::Error;

use crate::handle::BusyReason;
use crate::recognition::{SpeechError, TextRecognitionError};

/// Result type alias using mizan-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of persisted record an operation targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Conversation,
    Message,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Conversation => f.write_str("Conversation"),
            RecordKind::Message => f.write_str("Message"),
        }
    }
}

/// Coarse classification used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Validation,
    Authorization,
    NotFound,
    Recognition,
    Precondition,
    Storage,
    Cancelled,
}

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the answer provider layer
    #[error(transparent)]
    Ai(#[from] mizan_ai::Error),

    /// A conversation or message id that doesn't exist (anymore)
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// The storage backend failed
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Another send, recording or OCR run is in progress
    #[error("Busy: {0}")]
    Busy(BusyReason),

    /// Image data was empty
    #[error("Image data is empty")]
    EmptyImage,

    /// Nothing to send
    #[error("Message is empty")]
    EmptyInput,

    /// A collaborator the operation needs was not configured
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error(transparent)]
    TextRecognition(#[from] TextRecognitionError),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    /// The active stream was cancelled before completing
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ai(e) => match e {
                mizan_ai::Error::Unauthorized { .. } => ErrorKind::Authorization,
                mizan_ai::Error::Validation { .. } => ErrorKind::Validation,
                mizan_ai::Error::NotFound(_) => ErrorKind::NotFound,
                mizan_ai::Error::InvalidConfig(_) => ErrorKind::Precondition,
                _ => ErrorKind::Transport,
            },
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Busy(_) | Error::EmptyImage | Error::EmptyInput | Error::Unavailable(_) => {
                ErrorKind::Precondition
            }
            Error::TextRecognition(_) | Error::Speech(_) => ErrorKind::Recognition,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Stable short code for support correlation
    pub fn code(&self) -> &'static str {
        match self {
            Error::Ai(e) => match e {
                mizan_ai::Error::Http(_) => "E-NET",
                mizan_ai::Error::Json(_) => "E-RESP",
                mizan_ai::Error::Stream(_) => "E-STREAM",
                mizan_ai::Error::Status { .. } => "E-SRV",
                mizan_ai::Error::Unauthorized { .. } => "E-AUTH",
                mizan_ai::Error::Validation { .. } if e.is_missing_image_reference() => "E-VAL-IMG",
                mizan_ai::Error::Validation { .. } => "E-VAL",
                mizan_ai::Error::NotFound(_) => "E-404",
                mizan_ai::Error::InvalidConfig(_) => "E-CFG",
            },
            Error::NotFound { .. } => "E-404",
            Error::Storage(_) => "E-STORE",
            Error::Busy(_) => "E-BUSY",
            Error::EmptyImage => "E-IMG-EMPTY",
            Error::EmptyInput => "E-EMPTY",
            Error::Unavailable(_) => "E-UNAVAIL",
            Error::TextRecognition(_) => "E-OCR",
            Error::Speech(_) => "E-SPEECH",
            Error::Cancelled => "E-ABORT",
        }
    }

    /// The single human-readable message shown for this error
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Transport => {
                "Couldn't reach the server. Check your connection and try again.".to_string()
            }
            ErrorKind::Authorization => "Please sign in to continue.".to_string(),
            ErrorKind::NotFound => {
                "This conversation is no longer available. Start a new one to continue."
                    .to_string()
            }
            ErrorKind::Validation => match self {
                Error::Ai(mizan_ai::Error::Validation { message, .. }) => {
                    format!("The request was rejected: {}", message)
                }
                _ => "The request was rejected.".to_string(),
            },
            ErrorKind::Storage => "Couldn't save your conversation.".to_string(),
            ErrorKind::Cancelled => "The answer was cancelled.".to_string(),
            // Recognition and precondition failures are already phrased for the user.
            ErrorKind::Recognition | ErrorKind::Precondition => self.to_string(),
        }
    }

    /// Whether the caller should prompt for sign-in
    pub fn requires_sign_in(&self) -> bool {
        matches!(self.kind(), ErrorKind::Authorization)
    }
}
