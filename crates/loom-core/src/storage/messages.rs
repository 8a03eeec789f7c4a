//! Message persistence storage
//!
//! The message log is append-only. `sequence_id` is assigned inside an
//! immediate transaction as `MAX(sequence_id) + 1`, so the committed log of a
//! conversation is always exactly `1..=N`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::database::Database;
use crate::ai::types::Usage;
use crate::error::StorageError;

/// Closed set of message categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "agent")]
    Agent,
    #[serde(rename = "tool")]
    Tool,
    #[serde(rename = "system")]
    System,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "gitinfo")]
    GitInfo,
    #[serde(rename = "startup-hook")]
    StartupHook,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::User,
        MessageType::Agent,
        MessageType::Tool,
        MessageType::System,
        MessageType::Error,
        MessageType::GitInfo,
        MessageType::StartupHook,
    ];

    /// Storage tag
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Agent => "agent",
            MessageType::Tool => "tool",
            MessageType::System => "system",
            MessageType::Error => "error",
            MessageType::GitInfo => "gitinfo",
            MessageType::StartupHook => "startup-hook",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StorageError::ConstraintViolation(format!("unknown message type '{s}'")))
    }
}

/// A persisted, immutable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sequence_id: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Payload re-fed to the model; never rendered.
    pub llm_data: Option<Value>,
    pub user_data: Option<Value>,
    pub usage_data: Option<Usage>,
    pub display_data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A message before the store has assigned its identity and sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message_type: MessageType,
    pub llm_data: Option<Value>,
    pub user_data: Option<Value>,
    pub usage_data: Option<Usage>,
    pub display_data: Option<Value>,
}

impl NewMessage {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            llm_data: None,
            user_data: None,
            usage_data: None,
            display_data: None,
        }
    }

    pub fn with_llm_data(mut self, llm_data: Value) -> Self {
        self.llm_data = Some(llm_data);
        self
    }

    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn with_display_data(mut self, display_data: Value) -> Self {
        self.display_data = Some(display_data);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage_data = Some(usage);
        self
    }
}

/// A write coming from outside the typed path (imports, external clients).
/// The tag is validated against the closed set before anything is written.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub llm_data: Option<Value>,
    #[serde(default)]
    pub user_data: Option<Value>,
    #[serde(default)]
    pub usage_data: Option<Usage>,
    #[serde(default)]
    pub display_data: Option<Value>,
}

impl TryFrom<RawMessage> for NewMessage {
    type Error = StorageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let message_type = raw.message_type.parse::<MessageType>()?;
        Ok(Self {
            message_type,
            llm_data: raw.llm_data,
            user_data: raw.user_data,
            usage_data: raw.usage_data,
            display_data: raw.display_data,
        })
    }
}

/// Message persistence store
pub struct MessageStore<'a> {
    db: &'a Database,
}

impl<'a> MessageStore<'a> {
    /// Create a new message store with database reference
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append a message, assigning the next sequence id. The returned message
    /// is committed.
    pub fn append(&self, conversation_id: &str, message: NewMessage) -> Result<Message, StorageError> {
        let message_type = message.message_type;
        let llm_data = encode("llm_data", message.llm_data.as_ref())?;
        let user_data = encode("user_data", message.user_data.as_ref())?;
        let usage_data = encode("usage_data", message.usage_data.as_ref())?;
        let display_data = encode("display_data", message.display_data.as_ref())?;

        let tx = self.db.begin_immediate()?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                [conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::db("checking conversation", e))?;
        if !exists {
            return Err(StorageError::ConversationNotFound(conversation_id.to_string()));
        }

        let sequence_id: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::db("assigning sequence id", e))?;

        let message_id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();

        tx.execute(
            "INSERT INTO messages (message_id, conversation_id, sequence_id, type,
                 llm_data, user_data, usage_data, display_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message_id,
                conversation_id,
                sequence_id,
                message_type.as_str(),
                llm_data,
                user_data,
                usage_data,
                display_data,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StorageError::db("inserting message", e))?;

        tx.commit()
            .map_err(|e| StorageError::db("committing message", e))?;

        Ok(Message {
            message_id,
            conversation_id: conversation_id.to_string(),
            sequence_id,
            message_type,
            llm_data: message.llm_data,
            user_data: message.user_data,
            usage_data: message.usage_data,
            display_data: message.display_data,
            created_at,
        })
    }

    /// Read messages with `sequence_id >= from_seq`, in order.
    ///
    /// Fails with `SequenceGap` rather than returning a message whose
    /// predecessor is missing.
    pub fn read(&self, conversation_id: &str, from_seq: i64) -> Result<Vec<Message>, StorageError> {
        let mut stmt = self
            .db
            .conn()
            .prepare(
                "SELECT message_id, sequence_id, type, llm_data, user_data, usage_data,
                        display_data, created_at
                 FROM messages WHERE conversation_id = ?1 AND sequence_id >= ?2
                 ORDER BY sequence_id",
            )
            .map_err(|e| StorageError::db("preparing read", e))?;

        let rows = stmt
            .query_map(params![conversation_id, from_seq], |row| {
                Ok(MessageRow {
                    message_id: row.get(0)?,
                    sequence_id: row.get(1)?,
                    message_type: row.get(2)?,
                    llm_data: row.get(3)?,
                    user_data: row.get(4)?,
                    usage_data: row.get(5)?,
                    display_data: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(|e| StorageError::db("reading messages", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::db("reading messages", e))?;

        let mut expected = from_seq.max(1);
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            if row.sequence_id != expected {
                return Err(StorageError::SequenceGap {
                    conversation_id: conversation_id.to_string(),
                    expected,
                    found: row.sequence_id,
                });
            }
            expected += 1;
            messages.push(row.into_message(conversation_id)?);
        }

        Ok(messages)
    }

    /// Highest assigned sequence id, 0 when the conversation is empty
    pub fn last_sequence_id(&self, conversation_id: &str) -> Result<i64, StorageError> {
        self.db
            .conn()
            .query_row(
                "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::db("reading last sequence id", e))
    }

    /// Get total message count for a conversation
    pub fn message_count(&self, conversation_id: &str) -> Result<usize, StorageError> {
        let count: i64 = self
            .db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::db("counting messages", e))?;
        Ok(count as usize)
    }
}

struct MessageRow {
    message_id: String,
    sequence_id: i64,
    message_type: String,
    llm_data: Option<String>,
    user_data: Option<String>,
    usage_data: Option<String>,
    display_data: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn into_message(self, conversation_id: &str) -> Result<Message, StorageError> {
        let message_type = self.message_type.parse::<MessageType>()?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                StorageError::ConstraintViolation(format!(
                    "message {} has invalid created_at '{}': {e}",
                    self.message_id, self.created_at
                ))
            })?;

        Ok(Message {
            llm_data: decode("llm_data", &self.message_id, self.llm_data)?,
            user_data: decode("user_data", &self.message_id, self.user_data)?,
            usage_data: decode("usage_data", &self.message_id, self.usage_data)?,
            display_data: decode("display_data", &self.message_id, self.display_data)?,
            message_id: self.message_id,
            conversation_id: conversation_id.to_string(),
            sequence_id: self.sequence_id,
            message_type,
            created_at,
        })
    }
}

fn encode<T: Serialize>(field: &'static str, value: Option<&T>) -> Result<Option<String>, StorageError> {
    value
        .map(|v| serde_json::to_string(v).map_err(|source| StorageError::Encode { field, source }))
        .transpose()
}

fn decode<T: serde::de::DeserializeOwned>(
    field: &'static str,
    message_id: &str,
    raw: Option<String>,
) -> Result<Option<T>, StorageError> {
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|source| StorageError::Decode {
            field,
            message_id: message_id.to_string(),
            source,
        })
    })
    .transpose()
}
