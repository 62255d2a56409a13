//! Conversation engine: message assembly and the operations a chat screen drives

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use mizan_ai::{
    AnswerBuilder, ChatRequest, ChatResponse, ConversationType, FactCheckRequest, Route,
    StreamEvent, StreamEventStream,
    providers::{AnswerProvider, HistoryProvider},
};
use tokio::sync::broadcast;

use crate::{
    conversation::{Conversation, Message, NewMessage},
    error::{Error, Result},
    events::EngineEvent,
    factcheck::FactCheckResolver,
    handle::{BusyReason, EngineHandle},
    recognition::{RecognizedText, SpeechError, SpeechRecognizer, TextRecognizer},
    session::{SessionController, SessionIdentity},
    state::{ChatState, Phase, SurfacedError},
    store::ConversationStore,
    sync::{DEFAULT_TTL, FreshnessCache, SyncScope},
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ask the provider to stream thinking notes
    pub enable_thinking: bool,
    /// Use the streaming endpoint; otherwise ask and wait for the whole answer
    pub streaming: bool,
    pub language_preference: Option<String>,
    pub conversations_ttl: Duration,
    pub messages_ttl: Duration,
    /// Title for conversations whose first message is blank
    pub placeholder_title: String,
    pub title_max_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_thinking: true,
            streaming: true,
            language_preference: None,
            conversations_ttl: DEFAULT_TTL,
            messages_ttl: DEFAULT_TTL,
            placeholder_title: "New Conversation".to_string(),
            title_max_chars: 50,
        }
    }
}

/// A request ready to hand to the provider
enum Outgoing {
    Chat(ChatRequest),
    FactCheck {
        request: FactCheckRequest,
        image: Option<Vec<u8>>,
    },
}

/// Bookkeeping for the exchange currently being assembled
struct Exchange {
    conversation: Conversation,
    input: String,
    user_id: String,
    draft_id: Option<String>,
    builder: AnswerBuilder,
}

/// The conversation engine
pub struct Engine {
    config: EngineConfig,
    provider: Arc<dyn AnswerProvider>,
    history: Option<Arc<dyn HistoryProvider>>,
    store: Arc<dyn ConversationStore>,
    identity: SessionIdentity,
    session: SessionController,
    freshness: FreshnessCache,
    fact_check: FactCheckResolver,
    text_recognizer: Option<Arc<dyn TextRecognizer>>,
    speech_recognizer: Option<Arc<dyn SpeechRecognizer>>,
    state: ChatState,
    event_tx: broadcast::Sender<EngineEvent>,
    handle: EngineHandle,
}

impl Engine {
    /// Create a new engine
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn AnswerProvider>,
        store: Arc<dyn ConversationStore>,
        identity: SessionIdentity,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            session: SessionController::new(config.title_max_chars, config.placeholder_title.clone()),
            freshness: FreshnessCache::new(config.conversations_ttl, config.messages_ttl),
            config,
            provider,
            history: None,
            store,
            identity,
            fact_check: FactCheckResolver::new(),
            text_recognizer: None,
            speech_recognizer: None,
            state: ChatState::default(),
            event_tx,
            handle: EngineHandle::new(),
        }
    }

    /// Enable server-side history sync
    pub fn with_history(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_text_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.text_recognizer = Some(recognizer);
        self
    }

    pub fn with_speech_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.speech_recognizer = Some(recognizer);
        self
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current state
    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Replace the identity supplied by the host, e.g. after sign-in.
    ///
    /// Existing conversations keep the locality they were created with.
    pub fn set_identity(&mut self, identity: SessionIdentity) {
        self.identity = identity;
        self.state.requires_sign_in = false;
    }

    /// Get a cloneable handle for aborting and busy checks
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase != phase {
            tracing::debug!("Phase {:?} -> {:?}", self.state.phase, phase);
            self.state.phase = phase;
            self.emit(EngineEvent::PhaseChanged { phase });
        }
    }

    fn set_awaiting(&mut self, awaiting: bool) {
        if self.state.awaiting_first_chunk != awaiting {
            self.state.awaiting_first_chunk = awaiting;
            self.emit(EngineEvent::AwaitingFirstChunk { awaiting });
        }
    }

    /// Replace the input buffer
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.state.input = text.into();
        self.emit(EngineEvent::InputChanged {
            text: self.state.input.clone(),
        });
    }

    /// Send a question in the current conversation, creating one if needed
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let question = text.trim();
        if question.is_empty() {
            return Err(Error::EmptyInput);
        }
        let request = ChatRequest {
            question: question.to_string(),
            enable_thinking: self.config.enable_thinking,
            ..Default::default()
        };
        self.submit(text, ConversationType::Regular, Outgoing::Chat(request), None)
            .await
    }

    /// Fact-check a text, optionally with the image it was captured from
    pub async fn send_fact_check(&mut self, text: &str, image: Option<Vec<u8>>) -> Result<()> {
        if image.as_ref().is_some_and(|bytes| bytes.is_empty()) {
            return Err(Error::EmptyImage);
        }
        let reviewed = text.trim();
        if reviewed.is_empty() {
            return Err(Error::EmptyInput);
        }
        let request = FactCheckRequest {
            reviewed_text: reviewed.to_string(),
            enable_thinking: self.config.enable_thinking,
            ..Default::default()
        };
        let outgoing = Outgoing::FactCheck {
            request,
            image: image.clone(),
        };
        self.submit(text, ConversationType::FactCheck, outgoing, image)
            .await
    }

    async fn submit(
        &mut self,
        text: &str,
        conversation_type: ConversationType,
        mut outgoing: Outgoing,
        image: Option<Vec<u8>>,
    ) -> Result<()> {
        let _busy = self.handle.try_begin(BusyReason::Sending)?;
        let cancel = self.handle.reset_cancel();
        self.state.error = None;
        self.set_phase(Phase::Sending);

        let resolved = match self
            .session
            .resolve(self.store.as_ref(), &self.identity, text, conversation_type)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.fail(e, text, None, None)),
        };
        let conversation = resolved.conversation;
        if resolved.created {
            self.emit(EngineEvent::ConversationCreated {
                conversation_id: conversation.id.clone(),
                title: conversation.title.clone(),
                is_local_only: conversation.is_local_only,
            });
        }
        if self.state.conversation_id.as_deref() != Some(conversation.id.as_str()) {
            self.state
                .select(Some(conversation.id.clone()), conversation.messages.clone());
            self.emit(EngineEvent::ConversationSelected {
                conversation_id: Some(conversation.id.clone()),
            });
        }

        let mut user = Message::optimistic_user(&conversation.id, text.trim());
        user.image_data = image;
        user.detected_language = self.state.detected_language.take();
        user.is_fact_check_message = conversation_type == ConversationType::FactCheck;
        let user_id = user.id.clone();
        self.state.messages.push(user.clone());
        self.emit(EngineEvent::MessageAdded { message: user.clone() });
        self.set_input(String::new());
        self.set_awaiting(true);

        self.address(&mut outgoing, &conversation, user.detected_language.clone());

        let provider = self.provider.clone();
        let streaming = self.config.streaming;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            opened = open_stream(&mut self.fact_check, provider.as_ref(), streaming, &outgoing) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e, text, Some(&user_id), None)),
        };

        let mut exchange = Exchange {
            conversation,
            input: text.to_string(),
            user_id,
            draft_id: None,
            builder: AnswerBuilder::new(),
        };

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = stream.next() => Some(event),
            };
            let Some(event) = next else {
                tracing::debug!("Send cancelled before completion");
                break Err(Error::Cancelled);
            };
            let Some(event) = event else {
                break if exchange.draft_id.is_some() {
                    tracing::warn!("Stream closed without a done event; keeping the partial answer");
                    Ok(())
                } else {
                    Err(Error::from(mizan_ai::Error::Stream(
                        "stream closed before any answer".into(),
                    )))
                };
            };
            match self.apply_event(event, &mut exchange) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(()) => self.finalize(exchange).await,
            Err(e) => Err(self.fail(
                e,
                &exchange.input,
                Some(&exchange.user_id),
                exchange.draft_id.as_deref(),
            )),
        }
    }

    /// Fill in routing and continuity for the resolved conversation
    fn address(
        &self,
        outgoing: &mut Outgoing,
        conversation: &Conversation,
        detected_language: Option<String>,
    ) {
        let route = SessionController::route_for(&self.identity, conversation);
        let auth_token = match route {
            Route::Authenticated => self.identity.auth_token.clone(),
            Route::Guest => None,
        };
        let session_id = Some(SessionController::continuity_session_id(
            &self.identity,
            conversation,
        ));
        let language = detected_language.or_else(|| self.config.language_preference.clone());
        match outgoing {
            Outgoing::Chat(request) => {
                request.thread_id = conversation.thread_id.clone();
                request.session_id = session_id;
                request.language_preference = language;
                request.route = route;
                request.auth_token = auth_token;
            }
            Outgoing::FactCheck { request, .. } => {
                request.thread_id = conversation.thread_id.clone();
                request.session_id = session_id;
                request.language_preference = language;
                request.route = route;
                request.auth_token = auth_token;
            }
        }
    }

    /// Apply one stream event. Returns `true` once the answer is done.
    fn apply_event(&mut self, event: StreamEvent, exchange: &mut Exchange) -> Result<bool> {
        if matches!(
            event,
            StreamEvent::Metadata { .. } | StreamEvent::Thinking { .. } | StreamEvent::Chunk { .. }
        ) {
            self.set_phase(Phase::Streaming);
        }
        exchange.builder.process_event(&event);

        match event {
            StreamEvent::Metadata { thread_id } => {
                tracing::debug!("Stream metadata, thread id {:?}", thread_id);
                Ok(false)
            }
            StreamEvent::Thinking { text } => {
                self.set_awaiting(false);
                self.state.set_thinking(text.clone());
                self.emit(EngineEvent::ThinkingUpdated { text: Some(text) });
                Ok(false)
            }
            StreamEvent::Chunk { .. } => {
                self.set_awaiting(false);
                self.sync_draft(exchange);
                Ok(false)
            }
            StreamEvent::Done { .. } => {
                self.set_awaiting(false);
                self.state.clear_thinking();
                self.emit(EngineEvent::ThinkingUpdated { text: None });
                self.sync_draft(exchange);
                Ok(true)
            }
            StreamEvent::Error { cause } => Err(mizan_ai::Error::Stream(cause).into()),
            StreamEvent::Unknown { kind } => {
                tracing::debug!("Ignoring stream event of unknown type {}", kind);
                Ok(false)
            }
        }
    }

    /// Create the assistant draft on first content, otherwise update it in place
    fn sync_draft(&mut self, exchange: &mut Exchange) {
        let content = exchange.builder.content().to_string();
        let sources = exchange.builder.sources().to_vec();
        match exchange.draft_id.as_deref() {
            Some(id) => {
                if let Some(draft) = self.state.message_mut(id) {
                    draft.content = content.clone();
                    draft.sources = sources;
                }
                self.emit(EngineEvent::MessageUpdated {
                    message_id: id.to_string(),
                    content,
                });
            }
            None => {
                let mut draft = Message::assistant_draft(&exchange.conversation.id, content);
                draft.sources = sources;
                draft.is_fact_check_message =
                    exchange.conversation.conversation_type == ConversationType::FactCheck;
                exchange.draft_id = Some(draft.id.clone());
                self.state.messages.push(draft.clone());
                self.emit(EngineEvent::MessageAdded { message: draft });
            }
        }
    }

    /// Persist the finished exchange and return to idle
    async fn finalize(&mut self, exchange: Exchange) -> Result<()> {
        self.set_phase(Phase::Finalizing);
        let Exchange {
            conversation,
            user_id,
            draft_id,
            builder,
            ..
        } = exchange;

        if let Err(e) = self.assign_thread_id(&conversation, builder.thread_id()).await {
            return Err(self.report(e));
        }

        let persist = !self.identity.is_guest() || conversation.is_local_only;
        if persist {
            let ids = [Some(user_id), draft_id.clone()];
            for id in ids.into_iter().flatten() {
                if let Err(e) = self.persist_message(&id).await {
                    return Err(self.report(e));
                }
            }
        } else {
            tracing::debug!(
                "Not persisting exchange in ephemeral conversation {}",
                conversation.id
            );
        }

        self.state.clear_thinking();
        self.set_awaiting(false);
        let answer = self
            .state
            .messages
            .iter()
            .rev()
            .find(|m| !m.is_user_message)
            .cloned();
        self.set_phase(Phase::Idle);
        if let Some(message) = answer {
            self.emit(EngineEvent::AnswerCompleted { message });
        }
        Ok(())
    }

    /// Record the server's thread id, or the conversation's own id as a fallback
    async fn assign_thread_id(
        &mut self,
        conversation: &Conversation,
        from_server: Option<&str>,
    ) -> Result<()> {
        let thread_id = match from_server {
            Some(tid) => tid.to_string(),
            None if conversation.thread_id.is_none() && !conversation.is_local_only => {
                tracing::debug!("No thread id from server; using conversation id");
                conversation.id.clone()
            }
            None => return Ok(()),
        };
        if conversation.thread_id.as_deref() == Some(thread_id.as_str()) {
            return Ok(());
        }
        self.store
            .update_thread_id(&conversation.id, &thread_id)
            .await?;
        self.emit(EngineEvent::ThreadIdAssigned {
            conversation_id: conversation.id.clone(),
            thread_id,
        });
        Ok(())
    }

    async fn persist_message(&mut self, optimistic_id: &str) -> Result<()> {
        let Some(message) = self.state.message(optimistic_id) else {
            return Ok(());
        };
        let stored = self.store.add_message(NewMessage::from(message)).await?;
        self.state.rename_message(optimistic_id, &stored.id);
        self.emit(EngineEvent::MessagePersisted {
            optimistic_id: optimistic_id.to_string(),
            message_id: stored.id,
        });
        Ok(())
    }

    /// Roll back a failed send and surface the error
    fn fail(
        &mut self,
        error: Error,
        input: &str,
        user_id: Option<&str>,
        draft_id: Option<&str>,
    ) -> Error {
        self.set_phase(Phase::Failed);
        tracing::warn!("Send failed ({}): {}", error.code(), error);

        for id in [draft_id, user_id].into_iter().flatten() {
            if self.state.remove_message(id) {
                self.emit(EngineEvent::MessageRemoved {
                    message_id: id.to_string(),
                });
            }
        }
        self.state.input = input.to_string();
        self.emit(EngineEvent::InputRestored {
            text: input.to_string(),
        });
        self.state.clear_thinking();
        self.set_awaiting(false);

        let error = self.report(error);
        self.set_phase(Phase::Idle);
        error
    }

    /// Surface an error without touching messages or input
    fn report(&mut self, error: Error) -> Error {
        let surfaced = SurfacedError {
            code: error.code().to_string(),
            message: error.user_message(),
        };
        self.state.error = Some(surfaced.clone());
        self.emit(EngineEvent::Failed {
            code: surfaced.code,
            message: surfaced.message,
        });
        if error.requires_sign_in() {
            self.state.requires_sign_in = true;
            self.emit(EngineEvent::SignInRequired);
        }
        if self.state.phase != Phase::Idle && self.state.phase != Phase::Failed {
            self.set_phase(Phase::Idle);
        }
        error
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.handle.busy_reason() {
            Some(reason) => Err(Error::Busy(reason)),
            None => Ok(()),
        }
    }

    /// Open a stored conversation, refreshing its messages if they are stale
    pub async fn load_conversation(&mut self, id: &str) -> Result<()> {
        self.ensure_idle()?;
        let conversation = self.session.load(self.store.as_ref(), id).await?;
        self.state
            .select(Some(conversation.id.clone()), conversation.messages);
        self.emit(EngineEvent::ConversationSelected {
            conversation_id: Some(conversation.id),
        });

        if let Err(e) = self.refresh_messages(id, false).await {
            tracing::warn!("Keeping cached messages for {}: {}", id, e);
        }
        Ok(())
    }

    /// Clear the active conversation; the next send creates a new one
    pub fn start_new_conversation(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.session.set_current(None);
        self.state.select(None, vec![]);
        self.state.error = None;
        self.emit(EngineEvent::ConversationSelected {
            conversation_id: None,
        });
        Ok(())
    }

    pub async fn delete_conversation(&mut self, id: &str) -> Result<()> {
        self.ensure_idle()?;
        self.store.delete_conversation(id).await?;
        if self.state.conversation_id.as_deref() == Some(id) {
            self.start_new_conversation()?;
        }
        Ok(())
    }

    pub async fn delete_all_conversations(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.store.delete_all_conversations().await?;
        self.start_new_conversation()
    }

    /// History provider and token, when server sync applies
    fn sync_source(&self) -> Option<(Arc<dyn HistoryProvider>, String)> {
        if self.identity.is_guest() {
            return None;
        }
        let history = self.history.clone()?;
        let token = self.identity.auth_token.clone()?;
        Some((history, token))
    }

    /// Pull the conversation list from the server if stale.
    ///
    /// Returns whether a network fetch happened.
    pub async fn refresh_conversations(&mut self, force_refresh: bool) -> Result<bool> {
        let Some((history, token)) = self.sync_source() else {
            return Ok(false);
        };
        self.ensure_idle()?;
        let scope = SyncScope::Conversations;
        if !self.freshness.should_sync(&scope, force_refresh, Utc::now()) {
            tracing::debug!("{} still fresh", scope);
            return Ok(false);
        }

        let remote = history.list_conversations(&token).await?;
        let count = remote.len();
        for conversation in remote {
            self.store.upsert_remote(conversation).await?;
        }
        self.freshness.mark_synced(scope.clone(), Utc::now());
        tracing::info!("Synced {} conversations", count);
        self.emit(EngineEvent::Synced {
            scope: scope.to_string(),
        });
        Ok(true)
    }

    /// Pull one conversation's messages from the server if stale
    pub async fn refresh_messages(&mut self, id: &str, force_refresh: bool) -> Result<bool> {
        let Some((history, token)) = self.sync_source() else {
            return Ok(false);
        };
        self.ensure_idle()?;
        let scope = SyncScope::messages(id);
        if !self.freshness.should_sync(&scope, force_refresh, Utc::now()) {
            tracing::debug!("{} still fresh", scope);
            return Ok(false);
        }
        let conversation = self.store.fetch_conversation(id).await?;
        if conversation.is_local_only {
            return Ok(false);
        }

        let thread_id = conversation.thread_id.as_deref().unwrap_or(&conversation.id);
        let remote = history.fetch_messages(&token, thread_id).await?;
        let messages = self.store.replace_messages(id, remote).await?;
        self.freshness.mark_synced(scope.clone(), Utc::now());
        tracing::info!("Synced {} messages for {}", messages.len(), id);

        if self.state.conversation_id.as_deref() == Some(id) {
            self.state.messages = messages;
        }
        self.emit(EngineEvent::Synced {
            scope: scope.to_string(),
        });
        Ok(true)
    }

    /// Run text recognition on an image and put the result in the input buffer
    pub async fn recognize_image(&mut self, image: &[u8]) -> Result<RecognizedText> {
        let recognizer = self
            .text_recognizer
            .clone()
            .ok_or(Error::Unavailable("Text recognition"))?;
        if image.is_empty() {
            return Err(Error::EmptyImage);
        }
        let _busy = self.handle.try_begin(BusyReason::ProcessingImage)?;

        let recognized = match recognizer.recognize(image).await {
            Ok(recognized) => recognized,
            Err(e) => return Err(self.report(e.into())),
        };
        self.set_input(recognized.text.clone());
        self.state.detected_language = recognized.detected_language.clone();
        Ok(recognized)
    }

    /// Record speech into the input buffer until the recognizer finishes or the
    /// handle aborts. Returns the last transcript.
    pub async fn dictate(&mut self, locale: &str) -> Result<String> {
        let recognizer = self
            .speech_recognizer
            .clone()
            .ok_or(Error::Unavailable("Speech recognition"))?;
        let _busy = self.handle.try_begin(BusyReason::Recording)?;
        let cancel = self.handle.reset_cancel();

        if !recognizer.request_permission().await {
            return Err(self.report(SpeechError::PermissionDenied.into()));
        }
        let mut transcripts = match recognizer.start_recording(locale).await {
            Ok(transcripts) => transcripts,
            Err(e) => return Err(self.report(e.into())),
        };

        let mut last = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                partial = transcripts.next() => partial,
            };
            match next {
                Some(Ok(partial)) => {
                    self.set_input(partial.clone());
                    last = partial;
                }
                Some(Err(e)) => return Err(self.report(e.into())),
                None => break,
            }
        }
        Ok(last)
    }
}

/// Open the provider stream for a request
async fn open_stream(
    fact_check: &mut FactCheckResolver,
    provider: &dyn AnswerProvider,
    streaming: bool,
    outgoing: &Outgoing,
) -> Result<StreamEventStream> {
    match outgoing {
        Outgoing::Chat(request) if streaming => Ok(provider.stream_chat(request).await?),
        Outgoing::Chat(request) => {
            let response = provider.ask(request).await?;
            Ok(synthesized(response))
        }
        Outgoing::FactCheck { request, image } => {
            fact_check.open(provider, request, image.as_deref()).await
        }
    }
}

/// Replay a non-streaming response as the events a stream would have produced
fn synthesized(response: ChatResponse) -> StreamEventStream {
    Box::pin(futures::stream::iter(vec![
        StreamEvent::Metadata {
            thread_id: response.thread_id,
        },
        StreamEvent::Done {
            final_answer: Some(response.answer),
            sources: response.sources,
        },
    ]))
}
