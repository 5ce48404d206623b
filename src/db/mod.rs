//! Database module for persistent storage.
//!
//! Provides async SQLite access using SQLx for:
//! - Users, sessions, and entitlement flags
//! - Chats, memberships, messages, and reactions
//! - Activation keys
//! - Reports, the audit trail, and IP block entries

mod chats;
mod keys;
mod messages;
mod moderation;
mod stickers;
mod users;

pub use chats::{Chat, ChatKind, ChatRepository};
pub use keys::{ActivationKey, KeyFamily, KeyRepository};
pub use messages::{Message, MessageRepository, MessageType, MessageView, ReactionView};
pub use moderation::{
    AuditEntry, IpBlockRow, ModerationRepository, Report, ReportStatus,
};
pub use stickers::{StickerPack, StickerRepository};
pub use users::{GiftOutcome, User, UserRepository};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("chat not found: {0}")]
    ChatNotFound(i64),
    #[error("message not found: {0}")]
    MessageNotFound(i64),
    #[error("report not found: {0}")]
    ReportNotFound(i64),
    #[error("unknown activation key")]
    KeyNotFound,
    #[error("activation key already used")]
    KeyUsed,
    #[error("too many unused {family} keys outstanding: {unused}")]
    KeyCapReached { family: &'static str, unused: i64 },
    #[error("cannot create a private chat with yourself")]
    SelfChat,
    #[error("chat {0} is not a channel")]
    NotAChannel(i64),
    #[error("already subscribed")]
    AlreadySubscribed,
    #[error("not subscribed")]
    NotSubscribed,
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // Use a uniquely named shared-cache memory database per call.
            // `file::memory:` is global-ish and will collide across parallel tests.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:beegramd-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            // File-based database. Create parent directory if it doesn't exist.
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        // Run embedded migrations
        Self::run_migrations(&pool).await?;

        // WAL mode allows reads to happen while writes are in progress.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

        // Foreign key constraints are required for the ON DELETE CASCADE schema.
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::Migration)?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Seed default rows on first startup (sticker packs).
    pub async fn seed_defaults(&self) -> Result<(), DbError> {
        self.stickers().seed_defaults().await
    }

    /// Get user repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Get chat repository.
    pub fn chats(&self) -> ChatRepository<'_> {
        ChatRepository::new(&self.pool)
    }

    /// Get message repository.
    pub fn messages(&self) -> MessageRepository<'_> {
        MessageRepository::new(&self.pool)
    }

    /// Get activation key repository.
    pub fn keys(&self) -> KeyRepository<'_> {
        KeyRepository::new(&self.pool)
    }

    /// Get moderation repository.
    pub fn moderation(&self) -> ModerationRepository<'_> {
        ModerationRepository::new(&self.pool)
    }

    /// Get sticker repository.
    pub fn stickers(&self) -> StickerRepository<'_> {
        StickerRepository::new(&self.pool)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}
