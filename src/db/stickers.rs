//! Sticker pack repository with built-in seed packs.

use super::DbError;
use sqlx::SqlitePool;

/// A sticker pack row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StickerPack {
    pub id: i64,
    pub name: String,
    pub is_premium: bool,
}

const SEED_PACKS: &[(&str, bool, &[&str])] = &[
    ("Bees", false, &["🐝", "🍯", "🌻", "🌼", "🏵️"]),
    ("Classic", false, &["😀", "😂", "😍", "👍", "🔥", "🎉"]),
    ("Golden Hive", true, &["👑", "💎", "⭐", "🏆", "✨"]),
    ("Night Swarm", true, &["🌙", "🦇", "🌌", "⚡", "🕸️"]),
];

/// Repository for sticker packs.
pub struct StickerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StickerRepository<'a> {
    /// Create a new sticker repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the built-in packs if the table is empty. Safe to call on
    /// every startup.
    pub async fn seed_defaults(&self) -> Result<(), DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sticker_packs")
            .fetch_one(self.pool)
            .await?;
        if count > 0 {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (name, is_premium, emojis) in SEED_PACKS {
            let pack = sqlx::query("INSERT INTO sticker_packs (name, is_premium) VALUES (?, ?)")
                .bind(name)
                .bind(is_premium)
                .execute(&mut *tx)
                .await?;
            let pack_id = pack.last_insert_rowid();

            for emoji in *emojis {
                sqlx::query("INSERT INTO stickers (pack_id, emoji) VALUES (?, ?)")
                    .bind(pack_id)
                    .bind(emoji)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// List packs; premium packs only when the caller is entitled to them.
    pub async fn list_packs(&self, include_premium: bool) -> Result<Vec<StickerPack>, DbError> {
        let packs = sqlx::query_as::<_, StickerPack>(
            "SELECT id, name, is_premium FROM sticker_packs \
             WHERE is_premium = 0 OR ? ORDER BY id",
        )
        .bind(include_premium)
        .fetch_all(self.pool)
        .await?;
        Ok(packs)
    }

    /// Emojis of one pack.
    pub async fn pack_emojis(&self, pack_id: i64) -> Result<Vec<String>, DbError> {
        let emojis =
            sqlx::query_scalar::<_, String>("SELECT emoji FROM stickers WHERE pack_id = ? ORDER BY id")
                .bind(pack_id)
                .fetch_all(self.pool)
                .await?;
        Ok(emojis)
    }
}
