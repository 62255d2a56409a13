//! Error types for mizan-ai

use thiserror::Error;

/// Result type alias using mizan-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Why the provider rejected a request as invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    /// The request needs a server-addressable image URL and had none
    MissingImageReference,
    /// Any other validation failure
    Other,
}

/// Errors that can occur when talking to the answer provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connectivity, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The incremental stream terminated abnormally
    #[error("Stream error: {0}")]
    Stream(String),

    /// Provider returned a non-success status we don't classify further
    #[error("Provider error ({status}): {message}")]
    Status { status: u16, message: String },

    /// 401/403 from the provider
    #[error("Not authorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Provider rejected the request payload
    #[error("Validation failed: {message}")]
    Validation {
        reason: ValidationReason,
        message: String,
    },

    /// Remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(reason: ValidationReason, message: impl Into<String>) -> Self {
        Self::Validation {
            reason,
            message: message.into(),
        }
    }

    /// Whether the provider asked for an uploaded image reference
    pub fn is_missing_image_reference(&self) -> bool {
        matches!(
            self,
            Error::Validation {
                reason: ValidationReason::MissingImageReference,
                ..
            }
        )
    }

    /// Whether the failure is at the transport level (connectivity, framing, bad payloads)
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Http(_) | Error::Json(_) | Error::Stream(_) => true,
            Error::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the user has to sign in (again) before retrying
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_image_reference_detection() {
        let e = Error::validation(ValidationReason::MissingImageReference, "image_url required");
        assert!(e.is_missing_image_reference());
        assert!(!e.is_transport());

        let other = Error::validation(ValidationReason::Other, "text too long");
        assert!(!other.is_missing_image_reference());
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::Stream("connection reset".into()).is_transport());
        assert!(
            Error::Status {
                status: 502,
                message: "bad gateway".into()
            }
            .is_transport()
        );
        assert!(
            !Error::Status {
                status: 409,
                message: "conflict".into()
            }
            .is_transport()
        );
        assert!(!Error::NotFound("thread".into()).is_transport());
    }

    #[test]
    fn test_requires_sign_in() {
        let e = Error::Unauthorized {
            status: 401,
            message: "token expired".into(),
        };
        assert!(e.requires_sign_in());
        assert!(!Error::NotFound("conversation".into()).requires_sign_in());
    }
}
