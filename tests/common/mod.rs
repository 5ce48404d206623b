//! Shared fixtures for integration tests.

#![allow(dead_code)]

use beegramd::config::{LimitsConfig, ModerationConfig};
use beegramd::db::{Database, User};
use beegramd::events::ServerEvent;
use beegramd::moderation::{AuditSink, ModerationEngine};
use beegramd::pipeline::Pipeline;
use beegramd::rooms::{RoomId, RoomRegistry};
use beegramd::security::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct TestWorld {
    pub db: Database,
    pub rooms: Arc<RoomRegistry>,
    pub pipeline: Pipeline,
    pub moderation: ModerationEngine,
}

/// Fresh in-memory world with default quotas and policy.
pub async fn world() -> TestWorld {
    world_with(ModerationConfig::default()).await
}

/// Fresh in-memory world with a custom moderation policy.
pub async fn world_with(moderation_config: ModerationConfig) -> TestWorld {
    let db = Database::new(":memory:").await.expect("in-memory database");
    db.seed_defaults().await.expect("seed defaults");

    let rooms = Arc::new(RoomRegistry::new());
    let limiter = Arc::new(RateLimiter::new(LimitsConfig::default()));
    let pipeline = Pipeline::new(db.clone(), Arc::clone(&limiter), Arc::clone(&rooms));
    let audit = AuditSink::spawn(db.clone());
    let moderation = ModerationEngine::new(db.clone(), Arc::clone(&rooms), audit, moderation_config);

    TestWorld {
        db,
        rooms,
        pipeline,
        moderation,
    }
}

/// Create a user with full access. Most scenarios need users past the
/// early-access gate.
pub async fn make_user(db: &Database, username: &str) -> User {
    let user = db
        .users()
        .create(username, None)
        .await
        .expect("create user");
    set_user_flag(db, user.id, "is_early_access", true).await;
    refresh(db, user.id).await
}

/// Flip one boolean user column directly.
pub async fn set_user_flag(db: &Database, user_id: i64, column: &str, value: bool) {
    sqlx::query(&format!("UPDATE users SET {column} = ? WHERE id = ?"))
        .bind(value)
        .bind(user_id)
        .execute(db.pool())
        .await
        .expect("set user flag");
}

/// Re-read a user after flag or balance changes.
pub async fn refresh(db: &Database, user_id: i64) -> User {
    db.users()
        .find(user_id)
        .await
        .expect("find user")
        .expect("user exists")
}

/// Register a listener connection in a room and return its receiver.
pub fn listen(rooms: &RoomRegistry, room: RoomId) -> (u64, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn_id = rooms.next_conn_id();
    rooms.join(room, conn_id, tx);
    (conn_id, rx)
}

/// Pop the next broadcast event; panics when none arrived.
pub fn expect_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    rx.try_recv().expect("expected a broadcast event")
}

/// Assert no broadcast reached this listener.
pub fn expect_silence(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) {
    assert!(rx.try_recv().is_err(), "unexpected broadcast event");
}

/// Wait for the audit writer task to persist an entry with this action.
pub async fn wait_for_audit(db: &Database, action: &str) {
    for _ in 0..100 {
        let entries = db.moderation().audit_tail(50).await.expect("audit tail");
        if entries.iter().any(|e| e.action == action) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("audit entry {action:?} was never written");
}
