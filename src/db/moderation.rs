//! Moderation repository: reports, the audit trail, and IP block rows.

use super::DbError;
use sqlx::SqlitePool;

/// Report lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Open,
    Resolved,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "resolved" => Self::Resolved,
            _ => Self::Open,
        }
    }
}

/// A filed report against a message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub message_id: i64,
    pub reporter_id: i64,
    pub reason: String,
    pub status: String,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<i64>,
    pub created_at: i64,
}

impl Report {
    pub fn status(&self) -> ReportStatus {
        ReportStatus::parse(&self.status)
    }
}

/// One line of the append-only audit trail.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: i64,
    pub action: String,
    pub target: String,
    pub detail: Option<String>,
    pub created_at: i64,
}

/// A persisted IP or CIDR block.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IpBlockRow {
    pub ip: String,
    pub reason: String,
    pub created_by: Option<i64>,
    pub created_at: i64,
}

/// Repository for moderation state.
pub struct ModerationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ModerationRepository<'a> {
    /// Create a new moderation repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// File a report. Idempotent per (message, reporter): a second report
    /// of the same message by the same user returns the open report's id
    /// without inserting a duplicate.
    pub async fn file_report(
        &self,
        message_id: i64,
        reporter_id: i64,
        reason: &str,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM reports \
             WHERE message_id = ? AND reporter_id = ? AND status = 'open' LIMIT 1",
        )
        .bind(message_id)
        .bind(reporter_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = existing {
            tx.commit().await?;
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO reports (message_id, reporter_id, reason, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(reporter_id)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Open reports, oldest first.
    pub async fn open_reports(&self) -> Result<Vec<Report>, DbError> {
        let reports = sqlx::query_as::<_, Report>(
            "SELECT id, message_id, reporter_id, reason, status, resolved_by, resolved_at, \
             created_at FROM reports WHERE status = 'open' ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(reports)
    }

    /// Find a report by id.
    pub async fn find_report(&self, report_id: i64) -> Result<Option<Report>, DbError> {
        let report = sqlx::query_as::<_, Report>(
            "SELECT id, message_id, reporter_id, reason, status, resolved_by, resolved_at, \
             created_at FROM reports WHERE id = ?",
        )
        .bind(report_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(report)
    }

    /// Mark a report resolved. Returns `true` when this call closed it and
    /// `false` when it was already resolved.
    pub async fn mark_resolved(&self, report_id: i64, moderator_id: i64) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = 'resolved', resolved_by = ?, resolved_at = ?
            WHERE id = ? AND status = 'open'
            "#,
        )
        .bind(moderator_id)
        .bind(now)
        .bind(report_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append one audit line.
    pub async fn insert_audit(
        &self,
        actor_id: i64,
        action: &str,
        target: &str,
        detail: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO audit_log (actor_id, action, target, detail, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(actor_id)
        .bind(action)
        .bind(target)
        .bind(detail)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Audit lines, newest first.
    pub async fn audit_tail(&self, limit: i64) -> Result<Vec<AuditEntry>, DbError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, actor_id, action, target, detail, created_at \
             FROM audit_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(entries)
    }

    /// Record one suspicious event from an IP address.
    pub async fn insert_ip_event(&self, ip: &str, kind: &str) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO ip_events (ip, kind, created_at) VALUES (?, ?, ?)")
            .bind(ip)
            .bind(kind)
            .bind(now)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Persist an IP or CIDR block. Returns `false` if already present.
    pub async fn insert_ip_block(
        &self,
        ip: &str,
        reason: &str,
        created_by: Option<i64>,
    ) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO ip_blocks (ip, reason, created_by, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(ip)
        .bind(reason)
        .bind(created_by)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a persisted IP block. Returns `false` if it was not there.
    pub async fn delete_ip_block(&self, ip: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM ip_blocks WHERE ip = ?")
            .bind(ip)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All persisted IP blocks, for rebuilding the in-memory set at startup.
    pub async fn load_ip_blocks(&self) -> Result<Vec<IpBlockRow>, DbError> {
        let rows = sqlx::query_as::<_, IpBlockRow>(
            "SELECT ip, reason, created_by, created_at FROM ip_blocks",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}
