//! SQLite connection and schema migrations

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::StorageError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered schema migrations; index + 1 is the `user_version` after applying.
///
/// The `type` CHECK list must match `MessageType::ALL`. Adding a message
/// category means appending a migration that rebuilds `messages`.
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE conversations (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        working_dir TEXT
    );

    CREATE TABLE messages (
        message_id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL
            REFERENCES conversations(id) ON DELETE CASCADE,
        sequence_id INTEGER NOT NULL CHECK (sequence_id > 0),
        type TEXT NOT NULL CHECK (type IN (
            'user', 'agent', 'tool', 'system', 'error', 'gitinfo', 'startup-hook'
        )),
        llm_data TEXT,
        user_data TEXT,
        usage_data TEXT,
        display_data TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (conversation_id, sequence_id)
    );

    CREATE INDEX idx_conversations_created_at ON conversations(created_at);
"#];

/// One SQLite connection with the schema applied.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                operation: "creating database directory",
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StorageError::db("opening database", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::db("setting busy timeout", e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| StorageError::db("enabling WAL", e))?;
        // FULL sync: an acknowledged append has reached the disk.
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| StorageError::db("setting synchronous mode", e))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| StorageError::db("enabling foreign keys", e))?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start a write transaction that takes the database write lock up front.
    pub fn begin_immediate(&self) -> Result<Transaction<'_>, StorageError> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(|e| StorageError::db("beginning transaction", e))
    }

    fn schema_version(&self) -> Result<usize, StorageError> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| StorageError::db("reading schema version", e))?;
        Ok(version.max(0) as usize)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        if self.schema_version()? >= MIGRATIONS.len() {
            return Ok(());
        }

        let tx = self.begin_immediate()?;
        // Re-check under the write lock: another connection may have migrated.
        let current: i64 = tx
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| StorageError::db("reading schema version", e))?;

        for (index, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
            tx.execute_batch(sql)
                .map_err(|e| StorageError::db("applying migration", e))?;
            tx.execute_batch(&format!("PRAGMA user_version = {}", index + 1))
                .map_err(|e| StorageError::db("recording schema version", e))?;
            tracing::info!(version = index + 1, "Applied database migration");
        }

        tx.commit()
            .map_err(|e| StorageError::db("committing migrations", e))
    }
}
