//! Conversation store over SQLite.
//!
//! Identifier handling is deliberately lopsided: reads, title updates, and
//! deletes treat a malformed or unknown id as a no-op, while creation and the
//! relay path report it to the caller. Callers depend on both halves of that
//! contract.

use anyhow::{Context, Result, bail};
use sqlx::SqlitePool;

use super::models::{Chat, ChatMessage, CreateOutcome, Role};

/// Parse a caller-supplied conversation id.
///
/// Ids arrive as strings on the wire but are integers in storage. Anything
/// that doesn't parse as an integer is rejected here and handled per the
/// calling operation's policy.
pub fn parse_chat_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Store for conversations and their messages.
#[derive(Debug, Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    /// Create a new store over the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all conversations.
    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        sqlx::query_as::<_, Chat>("SELECT id, title FROM chats ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("listing chats")
    }

    /// Fetch a conversation's messages in insertion order.
    ///
    /// A malformed or unknown id yields an empty list, not an error.
    pub async fn get_messages(&self, raw_id: &str) -> Result<Vec<ChatMessage>> {
        let Some(id) = parse_chat_id(raw_id) else {
            return Ok(Vec::new());
        };

        sqlx::query_as::<_, ChatMessage>(
            "SELECT role, content FROM messages WHERE chat_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .context("fetching messages")
    }

    /// Create a conversation with a caller-assigned id.
    ///
    /// Creation is idempotent: an id that already exists is left untouched
    /// and reported as [`CreateOutcome::Exists`]. A malformed id is the one
    /// store input that errors.
    pub async fn create_chat(&self, raw_id: &str, title: &str) -> Result<CreateOutcome> {
        let Some(id) = parse_chat_id(raw_id) else {
            bail!("invalid chat id: {raw_id}");
        };

        let result = sqlx::query("INSERT OR IGNORE INTO chats (id, title) VALUES (?, ?)")
            .bind(id)
            .bind(title)
            .execute(&self.pool)
            .await
            .context("inserting chat")?;

        if result.rows_affected() == 0 {
            Ok(CreateOutcome::Exists)
        } else {
            Ok(CreateOutcome::Created)
        }
    }

    /// Create the conversation if it doesn't exist yet.
    ///
    /// Used by the relay path, which must not fail a turn over a missing
    /// conversation row.
    pub async fn ensure_chat(&self, id: i64, default_title: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO chats (id, title) VALUES (?, ?)")
            .bind(id)
            .bind(default_title)
            .execute(&self.pool)
            .await
            .context("ensuring chat exists")?;
        Ok(())
    }

    /// Update a conversation's title.
    ///
    /// Silently no-ops on a malformed or unknown id.
    pub async fn update_title(&self, raw_id: &str, title: &str) -> Result<()> {
        let Some(id) = parse_chat_id(raw_id) else {
            return Ok(());
        };

        sqlx::query("UPDATE chats SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating chat title")?;
        Ok(())
    }

    /// Delete a conversation and, via cascade, all of its messages.
    ///
    /// Silently no-ops on a malformed or unknown id.
    pub async fn delete_chat(&self, raw_id: &str) -> Result<()> {
        let Some(id) = parse_chat_id(raw_id) else {
            return Ok(());
        };

        sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting chat")?;
        Ok(())
    }

    /// Append a message to a conversation.
    ///
    /// The conversation must exist; callers create it first (see
    /// [`ChatStore::ensure_chat`]).
    pub async fn append_message(&self, chat_id: i64, role: Role, content: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (chat_id, role, content)
            VALUES (?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(chat_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .context("inserting message")
    }
}
