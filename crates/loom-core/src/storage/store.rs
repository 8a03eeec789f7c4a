//! Async conversation store
//!
//! Every operation opens its own connection on the blocking pool, so the store
//! is `Clone + Send + Sync` and callers never hold a connection across an
//! await point. Appends to the same conversation queue on an in-process lock
//! before taking the SQLite write lock; ordering across processes is still
//! guaranteed by the immediate transaction in [`MessageStore::append`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::conversations::{Conversation, ConversationManager};
use super::database::Database;
use super::messages::{Message, MessageStore, NewMessage, RawMessage};
use crate::error::StorageError;

#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    db_path: PathBuf,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationStore {
    /// Open the store, creating and migrating the database file if needed.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self {
            inner: Arc::new(StoreInner {
                db_path: db_path.into(),
                writers: DashMap::new(),
            }),
        };
        store.with_db(|_| Ok(())).await?;
        tracing::debug!(path = %store.db_path().display(), "Opened conversation store");
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let path = self.inner.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let db = Database::new(&path)?;
            f(&db)
        })
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
    }

    fn writer_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .writers
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Append a message. On `Ok` the message is durable and its sequence id is
    /// one greater than the previous message in the conversation.
    pub async fn append(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, StorageError> {
        let lock = self.writer_lock(conversation_id);
        let _guard = lock.lock().await;

        let conversation_id = conversation_id.to_string();
        let message = self
            .with_db(move |db| MessageStore::new(db).append(&conversation_id, message))
            .await?;

        tracing::debug!(
            conversation_id = %message.conversation_id,
            sequence_id = message.sequence_id,
            message_type = %message.message_type,
            "Appended message"
        );
        Ok(message)
    }

    /// Append an untyped message; an unknown type tag is rejected with
    /// `ConstraintViolation` and nothing is written.
    pub async fn append_raw(
        &self,
        conversation_id: &str,
        message: RawMessage,
    ) -> Result<Message, StorageError> {
        let message = NewMessage::try_from(message)?;
        self.append(conversation_id, message).await
    }

    /// Messages with `sequence_id >= from_seq`, ascending and contiguous.
    pub async fn read(&self, conversation_id: &str, from_seq: i64) -> Result<Vec<Message>, StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_db(move |db| MessageStore::new(db).read(&conversation_id, from_seq))
            .await
    }

    pub async fn last_sequence_id(&self, conversation_id: &str) -> Result<i64, StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_db(move |db| MessageStore::new(db).last_sequence_id(&conversation_id))
            .await
    }

    pub async fn message_count(&self, conversation_id: &str) -> Result<usize, StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_db(move |db| MessageStore::new(db).message_count(&conversation_id))
            .await
    }

    pub async fn create_conversation(
        &self,
        working_dir: Option<&Path>,
    ) -> Result<Conversation, StorageError> {
        let working_dir = working_dir.map(|p| p.to_string_lossy().into_owned());
        self.with_db(move |db| ConversationManager::new(db).create_conversation(working_dir.as_deref()))
            .await
    }

    pub async fn create_conversation_with_id(
        &self,
        id: &str,
        working_dir: Option<&Path>,
    ) -> Result<Conversation, StorageError> {
        let id = id.to_string();
        let working_dir = working_dir.map(|p| p.to_string_lossy().into_owned());
        self.with_db(move |db| {
            ConversationManager::new(db).create_conversation_with_id(&id, working_dir.as_deref())
        })
        .await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let id = id.to_string();
        self.with_db(move |db| ConversationManager::new(db).get_conversation(&id))
            .await
    }

    /// Like [`get_conversation`](Self::get_conversation) but a missing id is an error.
    pub async fn require_conversation(&self, id: &str) -> Result<Conversation, StorageError> {
        self.get_conversation(id)
            .await?
            .ok_or_else(|| StorageError::ConversationNotFound(id.to_string()))
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        self.with_db(|db| ConversationManager::new(db).list_conversations())
            .await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<bool, StorageError> {
        let owned = id.to_string();
        let deleted = self
            .with_db(move |db| ConversationManager::new(db).delete_conversation(&owned))
            .await?;
        self.inner.writers.remove(id);
        Ok(deleted)
    }
}
