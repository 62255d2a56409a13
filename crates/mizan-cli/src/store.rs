//! File-backed conversation store

use async_trait::async_trait;
use mizan_ai::{RemoteConversation, RemoteMessage};
use mizan_engine::{
    Conversation, ConversationStore, MemoryStore, Message, NewConversation, NewMessage,
    error::{Error, Result},
};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Keeps conversations in memory and writes a JSON snapshot after every change
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
}

impl FileStore {
    /// Get the data directory
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mizan")
    }

    pub fn default_path() -> PathBuf {
        Self::data_dir().join("conversations.json")
    }

    /// Open the store at `path`, starting empty if the file doesn't exist
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let conversations: Vec<Conversation> = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(std::io::Error::other)?
        } else {
            vec![]
        };
        tracing::debug!(
            "Loaded {} conversations from {}",
            conversations.len(),
            path.display()
        );

        Ok(Self {
            inner: MemoryStore::from_conversations(conversations),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir)?;
            }
            let content =
                serde_json::to_string_pretty(&self.inner.snapshot()).map_err(std::io::Error::other)?;
            let tmp = self.path.with_extension("json.tmp");
            fs::write(&tmp, content)?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn flushed<T>(&self, result: Result<T>) -> Result<T> {
        let value = result?;
        self.flush()?;
        Ok(value)
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.flushed(self.inner.create_conversation(new).await)
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Conversation> {
        self.inner.fetch_conversation(id).await
    }

    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        self.inner.fetch_conversations().await
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.flushed(self.inner.update_title(id, title).await)
    }

    async fn update_thread_id(&self, id: &str, thread_id: &str) -> Result<()> {
        self.flushed(self.inner.update_thread_id(id, thread_id).await)
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.flushed(self.inner.delete_conversation(id).await)
    }

    async fn delete_all_conversations(&self) -> Result<()> {
        self.flushed(self.inner.delete_all_conversations().await)
    }

    async fn add_message(&self, new: NewMessage) -> Result<Message> {
        self.flushed(self.inner.add_message(new).await)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.inner.fetch_messages(conversation_id).await
    }

    async fn update_message_content(&self, id: &str, content: &str) -> Result<()> {
        self.flushed(self.inner.update_message_content(id, content).await)
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.flushed(self.inner.delete_message(id).await)
    }

    async fn upsert_remote(&self, remote: RemoteConversation) -> Result<Conversation> {
        self.flushed(self.inner.upsert_remote(remote).await)
    }

    async fn replace_messages(
        &self,
        conversation_id: &str,
        messages: Vec<RemoteMessage>,
    ) -> Result<Vec<Message>> {
        self.flushed(self.inner.replace_messages(conversation_id, messages).await)
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Conversation>> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("mizan-store-{}", uuid::Uuid::new_v4()))
            .join("conversations.json")
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let path = temp_path();
        let store = FileStore::open(&path).unwrap();
        let conversation = store
            .create_conversation(NewConversation {
                title: "What is Islam?".into(),
                is_local_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let message = Message::optimistic_user(&conversation.id, "What is Islam?");
        store.add_message(NewMessage::from(&message)).await.unwrap();

        let reopened = FileStore::open(&path).unwrap();
        let loaded = reopened.fetch_conversation(&conversation.id).await.unwrap();
        assert_eq!(loaded.title, "What is Islam?");
        assert!(loaded.is_local_only);
        assert_eq!(loaded.messages.len(), 1);
        assert!(!loaded.messages[0].is_optimistic());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_write() {
        let path = temp_path();
        let store = FileStore::open(&path).unwrap();
        assert!(store.delete_conversation("missing").await.is_err());
        assert!(!path.exists());
    }
}
