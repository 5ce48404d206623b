//! Activation key repository.
//!
//! Keys are minted by staff in batches and redeemed exactly once. The
//! redeem path races through a conditional UPDATE so two clients
//! submitting the same code cannot both win.

use super::DbError;
use rand::RngCore;
use sqlx::SqlitePool;

/// Which entitlement a key unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Premium,
    EarlyAccess,
}

impl KeyFamily {
    /// Stable storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::EarlyAccess => "early_access",
        }
    }

    /// Column the redeem path flips on the user row.
    fn user_flag_column(&self) -> &'static str {
        match self {
            Self::Premium => "is_premium",
            Self::EarlyAccess => "is_early_access",
        }
    }
}

/// An activation key row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivationKey {
    pub id: i64,
    pub key_code: String,
    pub family: String,
    pub is_used: bool,
    pub used_by: Option<i64>,
    pub used_at: Option<i64>,
    pub created_at: i64,
}

/// Repository for activation key operations.
pub struct KeyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> KeyRepository<'a> {
    /// Create a new key repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Mint `count` fresh keys of one family.
    ///
    /// Refused when the number of outstanding unused keys in the family
    /// already meets `cap`; partial batches are still clamped to it.
    pub async fn generate(
        &self,
        family: KeyFamily,
        count: u32,
        cap: i64,
    ) -> Result<Vec<String>, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let unused = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM activation_keys WHERE family = ? AND is_used = 0",
        )
        .bind(family.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if unused >= cap {
            return Err(DbError::KeyCapReached {
                family: family.as_str(),
                unused,
            });
        }

        let room = (cap - unused).min(i64::from(count)) as usize;
        // Mint all codes up front; thread-local RNG state must not be held
        // across await points.
        let codes: Vec<String> = {
            let mut rng = rand::thread_rng();
            (0..room)
                .map(|_| format!("BEE-{:08X}-{:08X}", rng.next_u32(), rng.next_u32()))
                .collect()
        };

        for code in &codes {
            sqlx::query(
                "INSERT INTO activation_keys (key_code, family, created_at) VALUES (?, ?, ?)",
            )
            .bind(code)
            .bind(family.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(codes)
    }

    /// Redeem a key for a user. Exactly-once: the key is consumed and the
    /// matching entitlement flag is set in one transaction.
    ///
    /// The submitted code is trimmed and upper-cased before lookup.
    pub async fn activate(&self, user_id: i64, raw_code: &str) -> Result<KeyFamily, DbError> {
        let code = raw_code.trim().to_uppercase();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let family = sqlx::query_scalar::<_, String>(
            "SELECT family FROM activation_keys WHERE key_code = ?",
        )
        .bind(&code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::KeyNotFound)?;

        let claimed = sqlx::query(
            r#"
            UPDATE activation_keys
            SET is_used = 1, used_by = ?, used_at = ?
            WHERE key_code = ? AND is_used = 0
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(&code)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Err(DbError::KeyUsed);
        }

        let family = match family.as_str() {
            "premium" => KeyFamily::Premium,
            "early_access" => KeyFamily::EarlyAccess,
            other => return Err(DbError::Internal(format!("unknown key family: {other}"))),
        };

        sqlx::query(&format!(
            "UPDATE users SET {} = 1 WHERE id = ?",
            family.user_flag_column()
        ))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(family)
    }

    /// All keys, newest first.
    pub async fn list(&self) -> Result<Vec<ActivationKey>, DbError> {
        let keys = sqlx::query_as::<_, ActivationKey>(
            "SELECT id, key_code, family, is_used, used_by, used_at, created_at \
             FROM activation_keys ORDER BY id DESC",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_storage_strings() {
        assert_eq!(KeyFamily::Premium.as_str(), "premium");
        assert_eq!(KeyFamily::EarlyAccess.as_str(), "early_access");
    }
}
