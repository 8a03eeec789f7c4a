//! Conversation CRUD operations

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::error::StorageError;

/// Conversation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Directory tools and hooks run in
    pub working_dir: Option<String>,
}

/// Conversation manager for CRUD operations
pub struct ConversationManager<'a> {
    db: &'a Database,
}

impl<'a> ConversationManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a new conversation
    pub fn create_conversation(&self, working_dir: Option<&str>) -> Result<Conversation, StorageError> {
        self.create_conversation_with_id(&uuid::Uuid::new_v4().to_string(), working_dir)
    }

    /// Create a conversation under a caller-chosen id. An id already in use
    /// fails with `ConstraintViolation`.
    pub fn create_conversation_with_id(
        &self,
        id: &str,
        working_dir: Option<&str>,
    ) -> Result<Conversation, StorageError> {
        let conversation = Conversation {
            id: id.to_string(),
            created_at: Utc::now(),
            working_dir: working_dir.map(str::to_string),
        };

        self.db
            .conn()
            .execute(
                "INSERT INTO conversations (id, created_at, working_dir) VALUES (?1, ?2, ?3)",
                params![
                    conversation.id,
                    conversation.created_at.to_rfc3339(),
                    conversation.working_dir
                ],
            )
            .map_err(|e| StorageError::db("creating conversation", e))?;

        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        self.db
            .conn()
            .query_row(
                "SELECT id, created_at, working_dir FROM conversations WHERE id = ?1",
                [id],
                Self::map_conversation_row,
            )
            .optional()
            .map_err(|e| StorageError::db("loading conversation", e))
    }

    /// List conversations, newest first
    pub fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let mut stmt = self
            .db
            .conn()
            .prepare(
                "SELECT id, created_at, working_dir FROM conversations
                 ORDER BY created_at DESC, id",
            )
            .map_err(|e| StorageError::db("listing conversations", e))?;

        let conversations = stmt
            .query_map([], Self::map_conversation_row)
            .map_err(|e| StorageError::db("listing conversations", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::db("listing conversations", e))?;
        Ok(conversations)
    }

    /// Delete a conversation and, by cascade, all of its messages.
    /// Returns whether anything was deleted.
    pub fn delete_conversation(&self, id: &str) -> Result<bool, StorageError> {
        let deleted = self
            .db
            .conn()
            .execute("DELETE FROM conversations WHERE id = ?1", [id])
            .map_err(|e| StorageError::db("deleting conversation", e))?;
        Ok(deleted > 0)
    }

    fn map_conversation_row(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        let created_at: String = row.get(1)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;

        Ok(Conversation {
            id: row.get(0)?,
            created_at,
            working_dir: row.get(2)?,
        })
    }
}
