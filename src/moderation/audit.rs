//! Fire-and-forget audit sink.
//!
//! Moderation actions log through an unbounded channel drained by a single
//! writer task, so a slow disk cannot stall the action itself. A dropped
//! audit line is logged and lost; the moderation action still stands.

use crate::db::Database;
use tokio::sync::mpsc;
use tracing::warn;

/// One audit line awaiting persistence.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor_id: i64,
    pub action: &'static str,
    pub target: String,
    pub detail: Option<String>,
}

/// Handle for submitting audit records. Cheap to clone.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditSink {
    /// Spawn the writer task and return its sink.
    pub fn spawn(db: Database) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = db
                    .moderation()
                    .insert_audit(
                        record.actor_id,
                        record.action,
                        &record.target,
                        record.detail.as_deref(),
                    )
                    .await
                {
                    warn!(
                        actor_id = record.actor_id,
                        action = record.action,
                        error = %e,
                        "Failed to persist audit record"
                    );
                }
            }
        });
        Self { tx }
    }

    /// Submit one audit record. Infallible from the caller's side.
    pub fn log(&self, actor_id: i64, action: &'static str, target: String, detail: Option<String>) {
        let record = AuditRecord {
            actor_id,
            action,
            target,
            detail,
        };
        if self.tx.send(record).is_err() {
            warn!(actor_id, action, "Audit writer task is gone; record dropped");
        }
    }
}
