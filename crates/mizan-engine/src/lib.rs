//! mizan-engine: streaming conversation engine
//!
//! This crate turns provider streams into chat messages: optimistic sends,
//! in-place answer assembly, rollback on failure, conversation continuity,
//! freshness-gated history sync and the fact-check image retry.

pub mod conversation;
pub mod engine;
pub mod error;
pub mod events;
pub mod factcheck;
pub mod handle;
pub mod recognition;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;

pub use conversation::{Conversation, Message, NewConversation, NewMessage};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, ErrorKind, RecordKind, Result};
pub use events::EngineEvent;
pub use factcheck::FactCheckResolver;
pub use handle::{BusyReason, EngineHandle};
pub use recognition::{
    RecognizedText, SpeechError, SpeechRecognizer, TextRecognitionError, TextRecognizer,
};
pub use session::{AuthMode, SessionController, SessionIdentity};
pub use state::{ChatState, Phase, SurfacedError};
pub use store::{ConversationStore, MemoryStore};
pub use sync::{FreshnessCache, SyncScope};
