//! Persistence layer
//!
//! SQLite-based storage for:
//! - Conversations and their working directories
//! - The append-only, sequenced message log

mod conversations;
mod database;
mod messages;
mod store;

pub use conversations::{Conversation, ConversationManager};
pub use database::Database;
pub use messages::{Message, MessageStore, MessageType, NewMessage, RawMessage};
pub use store::ConversationStore;
