//! mizan-ai: answer provider client
//!
//! Wire types, the error taxonomy, the incremental stream normalizer and the
//! HTTP client for the question-answering service.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result, ValidationReason};
pub use stream::{AnswerBuilder, StreamEvent, StreamEventStream};
pub use types::*;
