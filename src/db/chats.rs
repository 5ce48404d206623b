//! Chat and membership repository.
//!
//! Owns the directory invariants: at most one private chat per unordered
//! user pair, and a `subscribers_count` cache that never drifts from the
//! actual membership count.

use super::DbError;
use sqlx::{SqliteConnection, SqlitePool};

/// Chat kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
    Support,
}

impl ChatKind {
    /// Stable storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Support => "support",
        }
    }

    /// Parse the storage string; unknown kinds fall back to `Group`.
    pub fn parse(s: &str) -> Self {
        match s {
            "private" => Self::Private,
            "channel" => Self::Channel,
            "support" => Self::Support,
            _ => Self::Group,
        }
    }
}

/// A chat row.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: i64,
    pub name: Option<String>,
    pub kind: ChatKind,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub creator_id: Option<i64>,
    pub subscribers_count: i64,
    pub created_at: i64,
}

type ChatRow = (
    i64,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
    i64,
);

fn chat_from_row(row: ChatRow) -> Chat {
    let (id, name, kind, description, avatar, creator_id, subscribers_count, created_at) = row;
    Chat {
        id,
        name,
        kind: ChatKind::parse(&kind),
        description,
        avatar,
        creator_id,
        subscribers_count,
        created_at,
    }
}

const CHAT_COLUMNS: &str =
    "id, name, kind, description, avatar, creator_id, subscribers_count, created_at";

/// Repository for chat directory operations.
pub struct ChatRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChatRepository<'a> {
    /// Create a new chat repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a chat by id.
    pub async fn find(&self, chat_id: i64) -> Result<Option<Chat>, DbError> {
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?"
        ))
        .bind(chat_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(chat_from_row))
    }

    /// Look up the private chat between two users, creating it if absent.
    ///
    /// Argument order does not matter; the lookup runs inside the same
    /// transaction as the insert so concurrent calls cannot create a
    /// duplicate pair.
    pub async fn get_or_create_private(&self, user_a: i64, user_b: i64) -> Result<i64, DbError> {
        if user_a == user_b {
            return Err(DbError::SelfChat);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT c.id
            FROM chats c
            JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?
            JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?
            WHERE c.kind = 'private'
            LIMIT 1
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(chat_id) = existing {
            tx.commit().await?;
            return Ok(chat_id);
        }

        let chat = sqlx::query("INSERT INTO chats (kind, created_at) VALUES ('private', ?)")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        let chat_id = chat.last_insert_rowid();

        for user_id in [user_a, user_b] {
            sqlx::query("INSERT INTO chat_members (chat_id, user_id, joined_at) VALUES (?, ?, ?)")
                .bind(chat_id)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(chat_id)
    }

    /// Create a group chat and enroll the creator plus the given members.
    pub async fn create_group(
        &self,
        creator_id: i64,
        name: &str,
        description: Option<&str>,
        member_ids: &[i64],
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let chat = sqlx::query(
            "INSERT INTO chats (name, kind, description, creator_id, created_at) \
             VALUES (?, 'group', ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let chat_id = chat.last_insert_rowid();

        sqlx::query("INSERT INTO chat_members (chat_id, user_id, joined_at) VALUES (?, ?, ?)")
            .bind(chat_id)
            .bind(creator_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        for member_id in member_ids {
            if *member_id == creator_id {
                continue;
            }
            sqlx::query(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at) VALUES (?, ?, ?)",
            )
            .bind(chat_id)
            .bind(member_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chat_id)
    }

    /// Create a channel with the creator as its first subscriber.
    pub async fn create_channel(
        &self,
        creator_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let chat = sqlx::query(
            "INSERT INTO chats (name, kind, description, creator_id, subscribers_count, created_at) \
             VALUES (?, 'channel', ?, ?, 1, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let chat_id = chat.last_insert_rowid();

        sqlx::query("INSERT INTO chat_members (chat_id, user_id, joined_at) VALUES (?, ?, ?)")
            .bind(chat_id)
            .bind(creator_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(chat_id)
    }

    /// The subscriber counter only exists on channels; reject every other
    /// chat kind before touching memberships.
    async fn require_channel(conn: &mut SqliteConnection, chat_id: i64) -> Result<(), DbError> {
        let kind = sqlx::query_scalar::<_, String>("SELECT kind FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(DbError::ChatNotFound(chat_id))?;
        if ChatKind::parse(&kind) != ChatKind::Channel {
            return Err(DbError::NotAChannel(chat_id));
        }
        Ok(())
    }

    /// Subscribe a user to a channel and bump the cached counter.
    ///
    /// The membership insert and the counter increment share a transaction,
    /// so the cache cannot drift from the real membership count.
    pub async fn subscribe(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        Self::require_channel(&mut tx, channel_id).await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(channel_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(DbError::AlreadySubscribed);
        }

        sqlx::query("UPDATE chats SET subscribers_count = subscribers_count + 1 WHERE id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Unsubscribe a user from a channel and decrement the cached counter.
    pub async fn unsubscribe(&self, channel_id: i64, user_id: i64) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        Self::require_channel(&mut tx, channel_id).await?;

        let deleted = sqlx::query("DELETE FROM chat_members WHERE chat_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(DbError::NotSubscribed);
        }

        sqlx::query("UPDATE chats SET subscribers_count = subscribers_count - 1 WHERE id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Member user ids of a chat, in join order.
    pub async fn members(&self, chat_id: i64) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM chat_members WHERE chat_id = ? ORDER BY id",
        )
        .bind(chat_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Whether a user is a member of a chat.
    pub async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, DbError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM chat_members WHERE chat_id = ? AND user_id = ? LIMIT 1",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Actual membership count, for verifying the derived counter.
    pub async fn member_count(&self, chat_id: i64) -> Result<i64, DbError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_members WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }

    /// Whether anyone other than `author_id` has posted in this chat.
    ///
    /// Drives the cold-outreach rule for spam-blocked users in private
    /// chats.
    pub async fn counterpart_has_posted(
        &self,
        chat_id: i64,
        author_id: i64,
    ) -> Result<bool, DbError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM messages WHERE chat_id = ? AND user_id != ? LIMIT 1",
        )
        .bind(chat_id)
        .bind(author_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Search public channels by name or description, busiest first.
    pub async fn search_channels(&self, query: &str, limit: i64) -> Result<Vec<Chat>, DbError> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            r#"
            SELECT {CHAT_COLUMNS}
            FROM chats
            WHERE kind = 'channel' AND (name LIKE ? OR description LIKE ?)
            ORDER BY subscribers_count DESC
            LIMIT ?
            "#
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(chat_from_row).collect())
    }

    /// Chats a user belongs to, newest first.
    pub async fn chats_of(&self, user_id: i64) -> Result<Vec<Chat>, DbError> {
        let rows = sqlx::query_as::<_, ChatRow>(
            r#"
            SELECT c.id, c.name, c.kind, c.description, c.avatar, c.creator_id,
                   c.subscribers_count, c.created_at
            FROM chats c
            JOIN chat_members m ON m.chat_id = c.id
            WHERE m.user_id = ?
            ORDER BY c.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(chat_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_kind_round_trip() {
        for kind in [
            ChatKind::Private,
            ChatKind::Group,
            ChatKind::Channel,
            ChatKind::Support,
        ] {
            assert_eq!(ChatKind::parse(kind.as_str()), kind);
        }
    }
}
