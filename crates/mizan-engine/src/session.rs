//! Conversation session controller.
//!
//! Owns which conversation is active, creates conversations lazily and keeps
//! thread identity consistent. All writes go through the store.

use mizan_ai::{ConversationType, Route};

use crate::{
    conversation::{Conversation, NewConversation, derive_title},
    error::{ErrorKind, Result},
    store::ConversationStore,
};

/// Whether the user is signed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    Guest,
    Authenticated,
}

/// Read-only identity supplied by the host application
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub mode: AuthMode,
    pub auth_token: Option<String>,
    /// Sticky guest session id, preferred for provider-side continuity
    pub guest_session_id: Option<String>,
}

impl SessionIdentity {
    pub fn guest(guest_session_id: Option<String>) -> Self {
        Self {
            mode: AuthMode::Guest,
            auth_token: None,
            guest_session_id,
        }
    }

    pub fn authenticated(auth_token: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Authenticated,
            auth_token: Some(auth_token.into()),
            guest_session_id: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.mode == AuthMode::Guest
    }
}

/// Outcome of resolving the conversation a send is attributed to
#[derive(Debug, Clone)]
pub struct ResolvedConversation {
    pub conversation: Conversation,
    /// Whether the conversation was created by this resolution
    pub created: bool,
}

/// Tracks the active conversation
#[derive(Debug, Clone)]
pub struct SessionController {
    current: Option<String>,
    title_max_chars: usize,
    placeholder_title: String,
}

impl SessionController {
    pub fn new(title_max_chars: usize, placeholder_title: impl Into<String>) -> Self {
        Self {
            current: None,
            title_max_chars,
            placeholder_title: placeholder_title.into(),
        }
    }

    pub fn current_conversation_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Publish a new active conversation (or none)
    pub fn set_current(&mut self, id: Option<String>) {
        self.current = id;
    }

    /// Return the conversation to attribute a send to, creating at most one.
    pub async fn resolve(
        &mut self,
        store: &dyn ConversationStore,
        identity: &SessionIdentity,
        first_message: &str,
        conversation_type: ConversationType,
    ) -> Result<ResolvedConversation> {
        if let Some(id) = self.current.clone() {
            match self.load(store, &id).await {
                Ok(conversation) if conversation.conversation_type == conversation_type => {
                    return Ok(ResolvedConversation {
                        conversation,
                        created: false,
                    });
                }
                Ok(conversation) => {
                    tracing::debug!(
                        "Active conversation {} is {:?}; starting a {:?} one",
                        conversation.id,
                        conversation.conversation_type,
                        conversation_type
                    );
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("Active conversation {} is gone; starting a new one", id);
                    self.current = None;
                }
                Err(e) => return Err(e),
            }
        }

        let title = derive_title(first_message, self.title_max_chars, &self.placeholder_title);
        let conversation = store
            .create_conversation(NewConversation {
                title,
                thread_id: None,
                is_local_only: identity.is_guest(),
                conversation_type,
            })
            .await?;
        tracing::info!(
            "Created conversation {} (local only: {})",
            conversation.id,
            conversation.is_local_only
        );
        self.current = Some(conversation.id.clone());
        Ok(ResolvedConversation {
            conversation,
            created: true,
        })
    }

    /// Fetch a conversation, repairing a missing thread id, and make it current.
    pub async fn load(&mut self, store: &dyn ConversationStore, id: &str) -> Result<Conversation> {
        let mut conversation = store.fetch_conversation(id).await?;
        repair_thread_id(store, &mut conversation).await?;
        self.current = Some(conversation.id.clone());
        Ok(conversation)
    }

    /// Endpoint family for a conversation.
    ///
    /// Locality is fixed at creation: a local-only conversation keeps using
    /// the guest path even after the user signs in.
    pub fn route_for(identity: &SessionIdentity, conversation: &Conversation) -> Route {
        if conversation.is_local_only || identity.is_guest() {
            Route::Guest
        } else {
            Route::Authenticated
        }
    }

    /// Session id for provider-side continuity: sticky guest id, then thread id, then conversation id
    pub fn continuity_session_id(identity: &SessionIdentity, conversation: &Conversation) -> String {
        identity
            .guest_session_id
            .clone()
            .or_else(|| conversation.thread_id.clone())
            .unwrap_or_else(|| conversation.id.clone())
    }
}

/// Give a remote conversation with history its own id as thread id if it has none
pub async fn repair_thread_id(
    store: &dyn ConversationStore,
    conversation: &mut Conversation,
) -> Result<bool> {
    if !conversation.needs_thread_repair() {
        return Ok(false);
    }
    tracing::warn!(
        "Conversation {} has history but no thread id; using its own id",
        conversation.id
    );
    store
        .update_thread_id(&conversation.id, &conversation.id)
        .await?;
    conversation.thread_id = Some(conversation.id.clone());
    Ok(true)
}
