//! User repository: accounts, entitlement flags, moderation flags, balances.
//!
//! Password hashing and session issuance live in the external account
//! service; this repository only resolves session tokens and mutates the
//! flags the moderation and entitlement layers own.

use super::DbError;
use sqlx::SqlitePool;

/// A registered user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub bio: Option<String>,
    pub status: String,
    pub avatar: String,
    pub theme: String,
    pub is_premium: bool,
    pub is_early_access: bool,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub is_spam_blocked: bool,
    pub banned_until: Option<i64>,
    pub bee_stars: i64,
    pub created_at: i64,
}

impl User {
    /// Admins and moderators bypass entitlement and spam gating.
    #[inline]
    pub fn is_staff(&self) -> bool {
        self.is_admin || self.is_moderator
    }

    /// Remaining ban minutes at `now`, if a timed ban is active.
    ///
    /// Rounds up so a ban with seconds left still reports one minute.
    pub fn ban_minutes_remaining(&self, now: i64) -> Option<i64> {
        match self.banned_until {
            Some(until) if until > now => Some((until - now + 59) / 60),
            _ => None,
        }
    }

    /// Maximum text message length in characters for this author.
    #[inline]
    pub fn message_char_limit(&self) -> usize {
        if self.is_premium || self.is_admin {
            1000
        } else {
            500
        }
    }

    /// Display name: nickname when set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}

/// Result of a successful gift transfer.
#[derive(Debug, Clone)]
pub struct GiftOutcome {
    /// Id of the inserted system message describing the transfer.
    pub message_id: i64,
    /// Sender balance after the debit.
    pub sender_balance: i64,
    pub receiver_id: i64,
    pub receiver_username: String,
    pub amount: i64,
}

const USER_COLUMNS: &str = "id, username, nickname, bio, status, avatar, theme, \
     is_premium, is_early_access, is_admin, is_moderator, is_spam_blocked, \
     banned_until, bee_stars, created_at";

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. The account service has already validated credentials.
    pub async fn create(&self, username: &str, nickname: Option<&str>) -> Result<User, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, nickname, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(nickname)
        .bind(now)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.find(id)
            .await?
            .ok_or_else(|| DbError::Internal(format!("user {id} missing after insert")))
    }

    /// Find a user by id.
    pub async fn find(&self, id: i64) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Find a user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Resolve an opaque session token to its user, if the session exists.
    pub async fn identity_from_session(&self, token: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.nickname, u.bio, u.status, u.avatar, u.theme,
                   u.is_premium, u.is_early_access, u.is_admin, u.is_moderator,
                   u.is_spam_blocked, u.banned_until, u.bee_stars, u.created_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Record a session token for a user. Normally done by the external
    /// account service; exposed for wiring and tests.
    pub async fn insert_session(&self, user_id: i64, token: &str) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT OR REPLACE INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(now)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear a timed ban. `until` is a Unix timestamp; `None` unbans.
    pub async fn set_ban(&self, user_id: i64, until: Option<i64>) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE users SET banned_until = ? WHERE id = ?")
            .bind(until)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Toggle the spam-block flag. Idempotent.
    pub async fn set_spam_block(&self, user_id: i64, blocked: bool) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE users SET is_spam_blocked = ? WHERE id = ?")
            .bind(blocked)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Grant or revoke the premium flag. Idempotent.
    pub async fn set_premium(&self, user_id: i64, premium: bool) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET is_premium = ? WHERE id = ?")
            .bind(premium)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Current bee-star balance.
    pub async fn balance(&self, user_id: i64) -> Result<i64, DbError> {
        let balance = sqlx::query_scalar::<_, i64>("SELECT bee_stars FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;
        balance.ok_or_else(|| DbError::UserNotFound(user_id.to_string()))
    }

    /// Atomic gift transfer: debit sender, credit receiver, insert the
    /// system message describing the transfer - all in one transaction.
    ///
    /// The debit is conditional on the current balance, so two concurrent
    /// gifts from one sender can never overdraw.
    pub async fn gift_transfer(
        &self,
        chat_id: i64,
        sender_id: i64,
        receiver_username: &str,
        amount: i64,
    ) -> Result<GiftOutcome, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let receiver = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, username FROM users WHERE username = ?",
        )
        .bind(receiver_username)
        .fetch_optional(&mut *tx)
        .await?;

        let (receiver_id, receiver_username) = receiver
            .ok_or_else(|| DbError::UserNotFound(receiver_username.to_string()))?;

        let debit = sqlx::query(
            "UPDATE users SET bee_stars = bee_stars - ? WHERE id = ? AND bee_stars >= ?",
        )
        .bind(amount)
        .bind(sender_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if debit.rows_affected() == 0 {
            let balance = sqlx::query_scalar::<_, i64>("SELECT bee_stars FROM users WHERE id = ?")
                .bind(sender_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::UserNotFound(sender_id.to_string()))?;
            return Err(DbError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }

        sqlx::query("UPDATE users SET bee_stars = bee_stars + ? WHERE id = ?")
            .bind(amount)
            .bind(receiver_id)
            .execute(&mut *tx)
            .await?;

        let content = format!("🐝 Sent {amount} bee stars to @{receiver_username}!");
        let message = sqlx::query(
            r#"
            INSERT INTO messages (chat_id, user_id, content, message_type, created_at)
            VALUES (?, ?, ?, 'system', ?)
            "#,
        )
        .bind(chat_id)
        .bind(sender_id)
        .bind(&content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let sender_balance =
            sqlx::query_scalar::<_, i64>("SELECT bee_stars FROM users WHERE id = ?")
                .bind(sender_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(GiftOutcome {
            message_id: message.last_insert_rowid(),
            sender_balance,
            receiver_id,
            receiver_username,
            amount,
        })
    }

    /// Delete a user. Memberships, sessions, and reactions cascade.
    pub async fn delete(&self, user_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
