//! Moderation engine: reports, resolutions, bans, and staff tooling.
//!
//! Report resolution is the exactly-once path: punitive side effects run
//! only on the call that transitions the report from open to resolved.
//! Resolving an already-resolved report is a silent no-op.

pub mod audit;

pub use audit::AuditSink;

use crate::access::{self, Action, GuardContext};
use crate::config::ModerationConfig;
use crate::db::{ActivationKey, Database, KeyFamily, Report, User};
use crate::error::{EventError, EventResult};
use crate::events::ServerEvent;
use crate::rooms::{RoomId, RoomRegistry};
use std::sync::Arc;
use tracing::info;

/// Punitive actions a moderator attaches to a report resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionActions {
    pub delete_message: bool,
    pub spam_block_author: bool,
    /// Timed ban in minutes; clamped to the configured maximum.
    pub ban_author_minutes: Option<i64>,
}

/// The moderation engine shared by staff surfaces.
pub struct ModerationEngine {
    db: Database,
    rooms: Arc<RoomRegistry>,
    audit: AuditSink,
    config: ModerationConfig,
}

impl ModerationEngine {
    pub fn new(
        db: Database,
        rooms: Arc<RoomRegistry>,
        audit: AuditSink,
        config: ModerationConfig,
    ) -> Self {
        Self {
            db,
            rooms,
            audit,
            config,
        }
    }

    /// File a report against a message. Idempotent per reporter.
    pub async fn submit_report(
        &self,
        reporter: &User,
        message_id: i64,
        reason: &str,
    ) -> EventResult<i64> {
        let ctx = GuardContext {
            actor: Some(reporter),
            action: Action::SubmitReport,
            now: chrono::Utc::now().timestamp(),
            private_counterpart_posted: None,
        };
        access::authorize(&ctx).map_err(EventError::from)?;

        if self.db.messages().find(message_id).await?.is_none() {
            return Err(EventError::NotFound("message"));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EventError::Validation(
                "A report needs a reason.".to_string(),
            ));
        }

        let report_id = self
            .db
            .moderation()
            .file_report(message_id, reporter.id, reason)
            .await?;
        info!(reporter_id = reporter.id, message_id, report_id, "Report filed");
        Ok(report_id)
    }

    /// Open reports for the staff queue, oldest first.
    pub async fn list_open_reports(&self, moderator: &User) -> EventResult<Vec<Report>> {
        access::require_moderator(moderator)?;
        Ok(self.db.moderation().open_reports().await?)
    }

    /// Resolve a report and apply the chosen punitive actions.
    ///
    /// Side effects run only when this call wins the open-to-resolved
    /// transition. Staff accounts cannot be spam-blocked or banned through
    /// this path.
    pub async fn resolve_report(
        &self,
        moderator: &User,
        report_id: i64,
        actions: ResolutionActions,
    ) -> EventResult<()> {
        access::require_moderator(moderator)?;

        let report = self
            .db
            .moderation()
            .find_report(report_id)
            .await?
            .ok_or(EventError::NotFound("report"))?;

        let message = self
            .db
            .messages()
            .find(report.message_id)
            .await?
            .ok_or(EventError::NotFound("message"))?;
        let author = self
            .db
            .users()
            .find(message.user_id)
            .await?
            .ok_or(EventError::NotFound("user"))?;

        if (actions.spam_block_author || actions.ban_author_minutes.is_some()) && author.is_staff()
        {
            return Err(EventError::Forbidden);
        }

        let won = self
            .db
            .moderation()
            .mark_resolved(report_id, moderator.id)
            .await?;
        if !won {
            return Ok(());
        }

        if actions.delete_message
            && self
                .db
                .messages()
                .soft_delete(report.message_id, moderator.id)
                .await?
        {
            self.rooms.broadcast(
                RoomId::Chat(message.chat_id),
                &ServerEvent::MessageDeleted {
                    chat_id: message.chat_id,
                    message_id: report.message_id,
                },
            );
        }

        if actions.spam_block_author {
            self.db.users().set_spam_block(author.id, true).await?;
        }

        if let Some(minutes) = actions.ban_author_minutes {
            let minutes = minutes.clamp(1, self.config.max_ban_minutes);
            let until = chrono::Utc::now().timestamp() + minutes * 60;
            self.db.users().set_ban(author.id, Some(until)).await?;
        }

        self.audit.log(
            moderator.id,
            "report_resolve",
            format!("report:{report_id}"),
            Some(format!(
                "message:{} author:{} delete:{} spam_block:{} ban_minutes:{:?}",
                report.message_id,
                author.id,
                actions.delete_message,
                actions.spam_block_author,
                actions.ban_author_minutes
            )),
        );
        info!(
            moderator_id = moderator.id,
            report_id, author_id = author.id, "Report resolved"
        );
        Ok(())
    }

    /// Apply a timed ban directly, outside the report flow.
    pub async fn ban_user(
        &self,
        moderator: &User,
        target_id: i64,
        minutes: i64,
    ) -> EventResult<()> {
        access::require_moderator(moderator)?;
        let target = self
            .db
            .users()
            .find(target_id)
            .await?
            .ok_or(EventError::NotFound("user"))?;
        if target.is_staff() {
            return Err(EventError::Forbidden);
        }

        let minutes = minutes.clamp(1, self.config.max_ban_minutes);
        let until = chrono::Utc::now().timestamp() + minutes * 60;
        self.db.users().set_ban(target_id, Some(until)).await?;
        self.audit.log(
            moderator.id,
            "user_ban",
            format!("user:{target_id}"),
            Some(format!("minutes:{minutes}")),
        );
        Ok(())
    }

    /// Lift a ban.
    pub async fn unban_user(&self, moderator: &User, target_id: i64) -> EventResult<()> {
        access::require_moderator(moderator)?;
        self.db.users().set_ban(target_id, None).await?;
        self.audit
            .log(moderator.id, "user_unban", format!("user:{target_id}"), None);
        Ok(())
    }

    /// Set or clear the spam-block flag directly.
    pub async fn set_spam_block(
        &self,
        moderator: &User,
        target_id: i64,
        blocked: bool,
    ) -> EventResult<()> {
        access::require_moderator(moderator)?;
        let target = self
            .db
            .users()
            .find(target_id)
            .await?
            .ok_or(EventError::NotFound("user"))?;
        if blocked && target.is_staff() {
            return Err(EventError::Forbidden);
        }

        self.db.users().set_spam_block(target_id, blocked).await?;
        self.audit.log(
            moderator.id,
            "user_spam_block",
            format!("user:{target_id}"),
            Some(format!("blocked:{blocked}")),
        );
        Ok(())
    }

    /// Mint activation keys. Admin only.
    pub async fn generate_keys(
        &self,
        admin: &User,
        family: KeyFamily,
        count: u32,
    ) -> EventResult<Vec<String>> {
        access::require_admin(admin)?;
        let codes = self
            .db
            .keys()
            .generate(family, count, self.config.key_cap)
            .await?;
        self.audit.log(
            admin.id,
            "keys_generate",
            format!("family:{}", family.as_str()),
            Some(format!("count:{}", codes.len())),
        );
        Ok(codes)
    }

    /// Minted keys and their redemption state, newest first. Admin only.
    pub async fn list_keys(&self, admin: &User) -> EventResult<Vec<ActivationKey>> {
        access::require_admin(admin)?;
        Ok(self.db.keys().list().await?)
    }

    /// Delete a user account entirely. Admin only; staff are protected.
    pub async fn delete_user(&self, admin: &User, target_id: i64) -> EventResult<()> {
        access::require_admin(admin)?;
        let target = self
            .db
            .users()
            .find(target_id)
            .await?
            .ok_or(EventError::NotFound("user"))?;
        if target.is_staff() {
            return Err(EventError::Forbidden);
        }

        self.db.users().delete(target_id).await?;
        self.audit
            .log(admin.id, "user_delete", format!("user:{target_id}"), None);
        Ok(())
    }
}
