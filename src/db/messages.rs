//! Message and reaction repository.
//!
//! Messages are never physically removed: deletion sets a tombstone and the
//! row stays queryable for the report chain-of-custody.

use super::DbError;
use sqlx::SqlitePool;

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    System,
    File,
    Voice,
    Sticker,
}

impl MessageType {
    /// Stable storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
            Self::File => "file",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
        }
    }

    /// Parse the storage string; unknown types fall back to `Text`.
    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Self::System,
            "file" => Self::File,
            "voice" => Self::Voice,
            "sticker" => Self::Sticker,
            _ => Self::Text,
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

/// A stored message row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub content: String,
    pub message_type: String,
    pub file_url: Option<String>,
    pub is_read: bool,
    pub is_deleted: bool,
    pub deleted_by: Option<i64>,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
}

/// One reaction on a message, joined with the reacting user.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, sqlx::FromRow)]
pub struct ReactionView {
    pub emoji: String,
    pub username: String,
}

/// The fully joined representation broadcast to room members.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageView {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub content: String,
    pub message_type: String,
    pub file_url: Option<String>,
    pub is_deleted: bool,
    pub created_at: i64,
    pub author_username: String,
    pub author_nickname: Option<String>,
    pub author_avatar: String,
    pub author_is_premium: bool,
    pub reactions: Vec<ReactionView>,
}

type MessageViewRow = (
    i64,
    i64,
    i64,
    String,
    String,
    Option<String>,
    bool,
    i64,
    String,
    Option<String>,
    String,
    bool,
);

const MESSAGE_COLUMNS: &str = "id, chat_id, user_id, content, message_type, file_url, \
     is_read, is_deleted, deleted_by, deleted_at, created_at";

/// Repository for message operations.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    /// Create a new message repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a message. Tombstone fields default to not-deleted.
    pub async fn insert(
        &self,
        chat_id: i64,
        user_id: i64,
        content: &str,
        message_type: MessageType,
        file_url: Option<&str>,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (chat_id, user_id, content, message_type, file_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(content)
        .bind(message_type.as_str())
        .bind(file_url)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Find a message row by id.
    pub async fn find(&self, message_id: i64) -> Result<Option<Message>, DbError> {
        let row = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(message_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    /// Fetch the joined broadcast view of a message, reactions included.
    pub async fn fetch_view(&self, message_id: i64) -> Result<MessageView, DbError> {
        let row = sqlx::query_as::<_, MessageViewRow>(
            r#"
            SELECT m.id, m.chat_id, m.user_id, m.content, m.message_type, m.file_url,
                   m.is_deleted, m.created_at,
                   u.username, u.nickname, u.avatar, u.is_premium
            FROM messages m
            JOIN users u ON u.id = m.user_id
            WHERE m.id = ?
            "#,
        )
        .bind(message_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(DbError::MessageNotFound(message_id))?;

        let reactions = self.reactions_of(message_id).await?;

        let (
            id,
            chat_id,
            user_id,
            content,
            message_type,
            file_url,
            is_deleted,
            created_at,
            author_username,
            author_nickname,
            author_avatar,
            author_is_premium,
        ) = row;

        Ok(MessageView {
            id,
            chat_id,
            user_id,
            content,
            message_type,
            file_url,
            is_deleted,
            created_at,
            author_username,
            author_nickname,
            author_avatar,
            author_is_premium,
            reactions,
        })
    }

    /// Soft-delete a message. Returns `true` when this call set the
    /// tombstone and `false` when the message was already deleted.
    ///
    /// Already-deleted rows are left untouched: tombstones are immutable.
    pub async fn soft_delete(&self, message_id: i64, deleted_by: i64) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_deleted = 1, deleted_by = ?, deleted_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(deleted_by)
        .bind(now)
        .bind(message_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Toggle a (message, user, emoji) reaction and return the message's
    /// complete current reaction set.
    ///
    /// Re-submitting an existing tuple removes it; the UNIQUE constraint
    /// makes the insert race-safe.
    pub async fn toggle_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Vec<ReactionView>, DbError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            sqlx::query(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?, ?, ?)",
            )
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.reactions_of(message_id).await
    }

    /// All reactions on a message, joined with usernames.
    pub async fn reactions_of(&self, message_id: i64) -> Result<Vec<ReactionView>, DbError> {
        let reactions = sqlx::query_as::<_, ReactionView>(
            r#"
            SELECT r.emoji, u.username
            FROM reactions r
            JOIN users u ON u.id = r.user_id
            WHERE r.message_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(message_id)
        .fetch_all(self.pool)
        .await?;
        Ok(reactions)
    }

    /// Messages of a chat in commit order, tombstones included.
    pub async fn list_chat(&self, chat_id: i64) -> Result<Vec<Message>, DbError> {
        let rows = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY id"
        ))
        .bind(chat_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Mark all messages from other authors in a chat as read.
    pub async fn mark_read(&self, chat_id: i64, reader_id: i64) -> Result<u64, DbError> {
        let result =
            sqlx::query("UPDATE messages SET is_read = 1 WHERE chat_id = ? AND user_id != ?")
                .bind(chat_id)
                .bind(reader_id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
