//! Conversation store: CRUD with cascade delete and a change feed.
//!
//! The store is the only component that mutates persisted records. Every
//! mutation republishes the full conversation list on a `watch` channel,
//! newest first.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use mizan_ai::{ConversationType, RemoteConversation, RemoteMessage};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    conversation::{Conversation, Message, NewConversation, NewMessage},
    error::{Error, RecordKind, Result},
};

/// Persistence boundary for conversations and messages
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation>;

    /// Fetch a conversation including its messages
    async fn fetch_conversation(&self, id: &str) -> Result<Conversation>;

    /// All conversations, newest first
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>>;

    async fn update_title(&self, id: &str, title: &str) -> Result<()>;

    async fn update_thread_id(&self, id: &str, thread_id: &str) -> Result<()>;

    /// Delete a conversation and all of its messages
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    async fn delete_all_conversations(&self) -> Result<()>;

    /// Add a message, returning it with its persisted id
    async fn add_message(&self, new: NewMessage) -> Result<Message>;

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn update_message_content(&self, id: &str, content: &str) -> Result<()>;

    async fn delete_message(&self, id: &str) -> Result<()>;

    /// Insert or update a conversation listed by the server
    async fn upsert_remote(&self, remote: RemoteConversation) -> Result<Conversation>;

    /// Replace a conversation's messages with the server's copy
    async fn replace_messages(
        &self,
        conversation_id: &str,
        messages: Vec<RemoteMessage>,
    ) -> Result<Vec<Message>>;

    /// Push-style feed of the full conversation list
    fn subscribe(&self) -> watch::Receiver<Vec<Conversation>>;
}

/// In-process store
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    changes: watch::Sender<Vec<Conversation>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_conversations(vec![])
    }

    /// Seed the store with previously saved conversations
    pub fn from_conversations(conversations: Vec<Conversation>) -> Self {
        let map: HashMap<String, Conversation> = conversations
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let (changes, _) = watch::channel(sorted(&map));
        Self {
            conversations: Mutex::new(map),
            changes,
        }
    }

    /// Current contents, newest first
    pub fn snapshot(&self) -> Vec<Conversation> {
        sorted(&self.conversations.lock())
    }

    /// Run `f` against the map and republish the list if it succeeded
    fn mutate<T>(&self, f: impl FnOnce(&mut HashMap<String, Conversation>) -> Result<T>) -> Result<T> {
        let mut guard = self.conversations.lock();
        let out = f(&mut guard)?;
        let list = sorted(&guard);
        drop(guard);
        self.changes.send_replace(list);
        Ok(out)
    }
}

fn sorted(map: &HashMap<String, Conversation>) -> Vec<Conversation> {
    let mut list: Vec<Conversation> = map.values().cloned().collect();
    list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    list
}

fn get_mut<'a>(
    map: &'a mut HashMap<String, Conversation>,
    id: &str,
) -> Result<&'a mut Conversation> {
    map.get_mut(id)
        .ok_or_else(|| Error::not_found(RecordKind::Conversation, id))
}

fn find_message_mut<'a>(
    map: &'a mut HashMap<String, Conversation>,
    id: &str,
) -> Result<(&'a mut Conversation, usize)> {
    map.values_mut()
        .find_map(|c| {
            let idx = c.messages.iter().position(|m| m.id == id)?;
            Some((c, idx))
        })
        .ok_or_else(|| Error::not_found(RecordKind::Message, id))
}

fn persisted_message(new: NewMessage) -> Message {
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: new.conversation_id,
        content: new.content,
        is_user_message: new.is_user_message,
        timestamp: new.timestamp,
        sources: new.sources,
        image_data: new.image_data,
        detected_language: new.detected_language,
        is_fact_check_message: new.is_fact_check_message,
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.mutate(|map| {
            let now = Utc::now();
            let conversation = Conversation {
                id: uuid::Uuid::new_v4().to_string(),
                thread_id: new.thread_id,
                title: new.title,
                created_at: now,
                updated_at: now,
                messages: vec![],
                is_local_only: new.is_local_only,
                conversation_type: new.conversation_type,
            };
            map.insert(conversation.id.clone(), conversation.clone());
            Ok(conversation)
        })
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Conversation> {
        self.conversations
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(RecordKind::Conversation, id))
    }

    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.snapshot())
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.mutate(|map| {
            let conversation = get_mut(map, id)?;
            conversation.title = title.to_string();
            conversation.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn update_thread_id(&self, id: &str, thread_id: &str) -> Result<()> {
        self.mutate(|map| {
            let conversation = get_mut(map, id)?;
            conversation.thread_id = Some(thread_id.to_string());
            Ok(())
        })
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.mutate(|map| {
            map.remove(id)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(RecordKind::Conversation, id))
        })
    }

    async fn delete_all_conversations(&self) -> Result<()> {
        self.mutate(|map| {
            map.clear();
            Ok(())
        })
    }

    async fn add_message(&self, new: NewMessage) -> Result<Message> {
        self.mutate(|map| {
            let conversation = get_mut(map, &new.conversation_id)?;
            let message = persisted_message(new);
            conversation.updated_at = Utc::now();
            conversation.messages.push(message.clone());
            Ok(message)
        })
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.fetch_conversation(conversation_id)
            .await
            .map(|c| c.messages)
    }

    async fn update_message_content(&self, id: &str, content: &str) -> Result<()> {
        self.mutate(|map| {
            let (conversation, idx) = find_message_mut(map, id)?;
            conversation.messages[idx].content = content.to_string();
            conversation.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.mutate(|map| {
            let (conversation, idx) = find_message_mut(map, id)?;
            conversation.messages.remove(idx);
            Ok(())
        })
    }

    async fn upsert_remote(&self, remote: RemoteConversation) -> Result<Conversation> {
        self.mutate(|map| {
            // Local-only records keep their locality and never absorb server data.
            if let Some(local) = map.get(&remote.id).filter(|c| c.is_local_only) {
                tracing::debug!("Server listed local-only conversation {}; left as is", local.id);
                return Ok(local.clone());
            }
            let existing = map
                .values()
                .filter(|c| !c.is_local_only)
                .find(|c| {
                    c.id == remote.id
                        || (remote.thread_id.is_some() && c.thread_id == remote.thread_id)
                })
                .map(|c| c.id.clone());

            let conversation = match existing {
                Some(id) => {
                    let conversation = get_mut(map, &id)?;
                    if !remote.title.is_empty() {
                        conversation.title = remote.title;
                    }
                    if remote.thread_id.is_some() {
                        conversation.thread_id = remote.thread_id;
                    }
                    conversation.updated_at = conversation.updated_at.max(remote.updated_at);
                    conversation.clone()
                }
                None => {
                    let conversation = Conversation {
                        id: remote.id,
                        thread_id: remote.thread_id,
                        title: remote.title,
                        created_at: remote.created_at,
                        updated_at: remote.updated_at,
                        messages: vec![],
                        is_local_only: false,
                        conversation_type: remote.conversation_type,
                    };
                    map.insert(conversation.id.clone(), conversation.clone());
                    conversation
                }
            };
            Ok(conversation)
        })
    }

    async fn replace_messages(
        &self,
        conversation_id: &str,
        messages: Vec<RemoteMessage>,
    ) -> Result<Vec<Message>> {
        self.mutate(|map| {
            let conversation = get_mut(map, conversation_id)?;
            let is_fact_check = conversation.conversation_type == ConversationType::FactCheck;
            conversation.messages = messages
                .into_iter()
                .map(|m| Message::from_remote(conversation_id, m, is_fact_check))
                .collect();
            conversation
                .messages
                .sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            Ok(conversation.messages.clone())
        })
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Conversation>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_conversation(title: &str) -> NewConversation {
        NewConversation {
            title: title.into(),
            ..Default::default()
        }
    }

    fn new_message(conversation_id: &str, content: &str, is_user: bool) -> NewMessage {
        NewMessage::from(&Message {
            is_user_message: is_user,
            ..Message::optimistic_user(conversation_id, content)
        })
    }

    #[tokio::test]
    async fn test_add_message_assigns_persisted_id() {
        let store = MemoryStore::new();
        let conv = store.create_conversation(new_conversation("a")).await.unwrap();

        let msg = store
            .add_message(new_message(&conv.id, "hello", true))
            .await
            .unwrap();
        assert!(!msg.is_optimistic());

        let messages = store.fetch_messages(&conv.id).await.unwrap();
        assert_eq!(messages, vec![msg]);
    }

    #[tokio::test]
    async fn test_not_found_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.fetch_conversation("missing").await,
            Err(Error::NotFound {
                kind: RecordKind::Conversation,
                ..
            })
        ));
        assert!(matches!(
            store.update_message_content("missing", "x").await,
            Err(Error::NotFound {
                kind: RecordKind::Message,
                ..
            })
        ));
        assert!(store.add_message(new_message("missing", "x", true)).await.is_err());
        assert!(store.delete_conversation("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades_messages() {
        let store = MemoryStore::new();
        let conv = store.create_conversation(new_conversation("a")).await.unwrap();
        let msg = store
            .add_message(new_message(&conv.id, "hello", true))
            .await
            .unwrap();

        store.delete_conversation(&conv.id).await.unwrap();
        assert!(store.fetch_messages(&conv.id).await.is_err());
        assert!(store.delete_message(&msg.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete_message() {
        let store = MemoryStore::new();
        let conv = store.create_conversation(new_conversation("a")).await.unwrap();
        let msg = store
            .add_message(new_message(&conv.id, "draft", false))
            .await
            .unwrap();

        store.update_message_content(&msg.id, "final").await.unwrap();
        assert_eq!(store.fetch_messages(&conv.id).await.unwrap()[0].content, "final");

        store.delete_message(&msg.id).await.unwrap();
        assert!(store.fetch_messages(&conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_feed_publishes_full_list() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        assert!(rx.borrow().is_empty());

        let first = store.create_conversation(new_conversation("first")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.create_conversation(new_conversation("second")).await.unwrap();
        store.update_title(&first.id, "renamed").await.unwrap();
        let list = rx.borrow_and_update().clone();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "renamed", "most recently updated first");

        store.delete_all_conversations().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_remote_matches_by_thread_id() {
        let store = MemoryStore::new();
        let local = store
            .create_conversation(NewConversation {
                title: "local title".into(),
                thread_id: Some("tid-7".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let now = Utc::now();
        let merged = store
            .upsert_remote(RemoteConversation {
                id: "server-7".into(),
                thread_id: Some("tid-7".into()),
                title: "server title".into(),
                created_at: now - Duration::days(1),
                updated_at: now + Duration::seconds(5),
                conversation_type: ConversationType::Regular,
            })
            .await
            .unwrap();

        assert_eq!(merged.id, local.id);
        assert_eq!(merged.title, "server title");
        assert_eq!(store.fetch_conversations().await.unwrap().len(), 1);

        let inserted = store
            .upsert_remote(RemoteConversation {
                id: "server-8".into(),
                thread_id: None,
                title: "other".into(),
                created_at: now,
                updated_at: now,
                conversation_type: ConversationType::FactCheck,
            })
            .await
            .unwrap();
        assert_eq!(inserted.id, "server-8");
        assert!(!inserted.is_local_only);
        assert_eq!(store.fetch_conversations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replace_messages_orders_by_timestamp() {
        let store = MemoryStore::new();
        let conv = store.create_conversation(new_conversation("a")).await.unwrap();
        let now = Utc::now();
        let messages = store
            .replace_messages(
                &conv.id,
                vec![
                    RemoteMessage {
                        id: "2".into(),
                        content: "answer".into(),
                        is_user_message: false,
                        timestamp: now,
                        sources: vec![],
                    },
                    RemoteMessage {
                        id: "1".into(),
                        content: "question".into(),
                        is_user_message: true,
                        timestamp: now - Duration::seconds(3),
                        sources: vec![],
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(messages[0].content, "question");
        assert_eq!(messages[1].content, "answer");
    }

    #[tokio::test]
    async fn test_upsert_remote_keeps_local_only_conversations_local() {
        let store = MemoryStore::new();
        let local = store
            .create_conversation(NewConversation {
                title: "guest chat".into(),
                thread_id: Some("tid-g".into()),
                is_local_only: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let now = Utc::now();
        let merged = store
            .upsert_remote(RemoteConversation {
                id: "server-g".into(),
                thread_id: Some("tid-g".into()),
                title: "server title".into(),
                created_at: now,
                updated_at: now,
                conversation_type: ConversationType::Regular,
            })
            .await
            .unwrap();
        assert_eq!(merged.id, "server-g");
        assert!(!merged.is_local_only);

        let kept = store.fetch_conversation(&local.id).await.unwrap();
        assert!(kept.is_local_only);
        assert_eq!(kept.title, "guest chat");

        let same_id = store
            .upsert_remote(RemoteConversation {
                id: local.id.clone(),
                thread_id: None,
                title: "overwrite".into(),
                created_at: now,
                updated_at: now,
                conversation_type: ConversationType::Regular,
            })
            .await
            .unwrap();
        assert!(same_id.is_local_only);
        assert_eq!(same_id.title, "guest chat");
    }

    #[tokio::test]
    async fn test_replace_messages_keeps_server_ids() {
        let store = MemoryStore::new();
        let conv = store
            .create_conversation(NewConversation {
                title: "check".into(),
                conversation_type: ConversationType::FactCheck,
                ..Default::default()
            })
            .await
            .unwrap();
        let remote = RemoteMessage {
            id: "srv-msg-1".into(),
            content: "claim".into(),
            is_user_message: true,
            timestamp: Utc::now(),
            sources: vec![],
        };

        let first = store
            .replace_messages(&conv.id, vec![remote.clone()])
            .await
            .unwrap();
        let second = store.replace_messages(&conv.id, vec![remote]).await.unwrap();
        assert_eq!(first[0].id, "srv-msg-1");
        assert_eq!(first[0].id, second[0].id);
        assert!(second[0].is_fact_check_message);
        assert!(!second[0].is_optimistic());
    }
}
