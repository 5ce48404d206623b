// tests/moderation_flow.rs
//! Report lifecycle, punitive actions, staff protection, activation keys,
//! and the audit trail.

mod common;

use beegramd::config::ModerationConfig;
use beegramd::db::{KeyFamily, MessageType};
use beegramd::error::EventError;
use beegramd::events::ServerEvent;
use beegramd::moderation::ResolutionActions;
use beegramd::rooms::RoomId;
use common::*;

async fn reported_message(w: &TestWorld) -> (beegramd::db::User, beegramd::db::User, i64, i64) {
    let author = make_user(&w.db, "author").await;
    let reporter = make_user(&w.db, "reporter").await;
    let chat_id = w
        .db
        .chats()
        .get_or_create_private(author.id, reporter.id)
        .await
        .unwrap();
    let view = w
        .pipeline
        .send_message(&author, chat_id, "rude words", MessageType::Text, None)
        .await
        .unwrap();
    (author, reporter, chat_id, view.id)
}

#[tokio::test]
async fn report_is_idempotent_per_reporter() {
    let w = world().await;
    let (_, reporter, _, message_id) = reported_message(&w).await;

    let first = w
        .moderation
        .submit_report(&reporter, message_id, "spam")
        .await
        .unwrap();
    let second = w
        .moderation
        .submit_report(&reporter, message_id, "spam again")
        .await
        .unwrap();
    assert_eq!(first, second);

    // A different reporter opens a separate report.
    let other = make_user(&w.db, "other").await;
    w.db.chats()
        .get_or_create_private(other.id, reporter.id)
        .await
        .unwrap();
    let third = w
        .moderation
        .submit_report(&other, message_id, "also spam")
        .await
        .unwrap();
    assert_ne!(first, third);
}

#[tokio::test]
async fn report_requires_existing_message_and_reason() {
    let w = world().await;
    let (_, reporter, _, message_id) = reported_message(&w).await;

    let err = w
        .moderation
        .submit_report(&reporter, 424242, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::NotFound(_)));

    let err = w
        .moderation
        .submit_report(&reporter, message_id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Validation(_)));
}

#[tokio::test]
async fn resolution_applies_actions_exactly_once() {
    let w = world().await;
    let (author, reporter, chat_id, message_id) = reported_message(&w).await;
    let report_id = w
        .moderation
        .submit_report(&reporter, message_id, "spam")
        .await
        .unwrap();

    let moderator = make_user(&w.db, "mod").await;
    set_user_flag(&w.db, moderator.id, "is_moderator", true).await;
    let moderator = refresh(&w.db, moderator.id).await;

    let (_, mut rx) = listen(&w.rooms, RoomId::Chat(chat_id));
    w.moderation
        .resolve_report(
            &moderator,
            report_id,
            ResolutionActions {
                delete_message: true,
                spam_block_author: true,
                ban_author_minutes: Some(10),
            },
        )
        .await
        .unwrap();

    let message = w.db.messages().find(message_id).await.unwrap().unwrap();
    assert!(message.is_deleted);
    let author_now = refresh(&w.db, author.id).await;
    assert!(author_now.is_spam_blocked);
    assert!(author_now.banned_until.is_some());
    assert!(matches!(
        expect_event(&mut rx),
        ServerEvent::MessageDeleted { .. }
    ));

    // Undo the punishments, then resolve again: exactly-once means the
    // second call re-applies nothing.
    w.db.users().set_ban(author.id, None).await.unwrap();
    w.db.users().set_spam_block(author.id, false).await.unwrap();
    w.moderation
        .resolve_report(
            &moderator,
            report_id,
            ResolutionActions {
                delete_message: true,
                spam_block_author: true,
                ban_author_minutes: Some(10),
            },
        )
        .await
        .unwrap();

    let author_now = refresh(&w.db, author.id).await;
    assert!(!author_now.is_spam_blocked);
    assert!(author_now.banned_until.is_none());
    expect_silence(&mut rx);
}

#[tokio::test]
async fn ban_duration_is_clamped() {
    let w = world().await;
    let moderator = make_user(&w.db, "mod").await;
    set_user_flag(&w.db, moderator.id, "is_moderator", true).await;
    let moderator = refresh(&w.db, moderator.id).await;
    let target = make_user(&w.db, "target").await;

    let before = chrono::Utc::now().timestamp();
    w.moderation
        .ban_user(&moderator, target.id, 9_999_999)
        .await
        .unwrap();

    let target = refresh(&w.db, target.id).await;
    let until = target.banned_until.expect("ban set");
    let max = ModerationConfig::default().max_ban_minutes * 60;
    assert!(until <= before + max + 5);
    assert!(until > before);
}

#[tokio::test]
async fn staff_accounts_are_protected() {
    let w = world().await;
    let moderator = make_user(&w.db, "mod").await;
    set_user_flag(&w.db, moderator.id, "is_moderator", true).await;
    let moderator = refresh(&w.db, moderator.id).await;

    let admin = make_user(&w.db, "admin").await;
    set_user_flag(&w.db, admin.id, "is_admin", true).await;
    let admin = refresh(&w.db, admin.id).await;

    let err = w
        .moderation
        .ban_user(&moderator, admin.id, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Forbidden));
    let err = w
        .moderation
        .set_spam_block(&moderator, admin.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Forbidden));
    let err = w.moderation.delete_user(&admin, moderator.id).await.unwrap_err();
    assert!(matches!(err, EventError::Forbidden));
}

#[tokio::test]
async fn only_staff_resolve_and_only_admins_mint_keys() {
    let w = world().await;
    let (_, reporter, _, message_id) = reported_message(&w).await;
    let report_id = w
        .moderation
        .submit_report(&reporter, message_id, "spam")
        .await
        .unwrap();

    let civilian = make_user(&w.db, "civilian").await;
    let err = w
        .moderation
        .resolve_report(&civilian, report_id, ResolutionActions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Forbidden));

    let moderator = make_user(&w.db, "mod").await;
    set_user_flag(&w.db, moderator.id, "is_moderator", true).await;
    let moderator = refresh(&w.db, moderator.id).await;
    let err = w
        .moderation
        .generate_keys(&moderator, KeyFamily::Premium, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Forbidden));
    let err = w.moderation.list_keys(&moderator).await.unwrap_err();
    assert!(matches!(err, EventError::Forbidden));
}

#[tokio::test]
async fn key_lifecycle_mint_cap_and_single_activation() {
    let w = world_with(ModerationConfig {
        key_cap: 2,
        ..ModerationConfig::default()
    })
    .await;
    let admin = make_user(&w.db, "admin").await;
    set_user_flag(&w.db, admin.id, "is_admin", true).await;
    let admin = refresh(&w.db, admin.id).await;

    // A batch over the cap is clamped; the next batch is refused outright.
    let codes = w
        .moderation
        .generate_keys(&admin, KeyFamily::Premium, 5)
        .await
        .unwrap();
    assert_eq!(codes.len(), 2);
    assert!(codes[0].starts_with("BEE-"));

    // The admin queue view shows the whole batch, unredeemed.
    let minted = w.moderation.list_keys(&admin).await.unwrap();
    assert_eq!(minted.len(), 2);
    assert!(
        minted
            .iter()
            .all(|k| !k.is_used && k.key_code.starts_with("BEE-"))
    );

    let err = w
        .moderation
        .generate_keys(&admin, KeyFamily::Premium, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Conflict(_)));

    let user = make_user(&w.db, "user").await;
    // Codes are normalized before lookup.
    let sloppy = format!("  {}  ", codes[0].to_lowercase());
    let family = w.db.keys().activate(user.id, &sloppy).await.unwrap();
    assert_eq!(family, KeyFamily::Premium);
    assert!(refresh(&w.db, user.id).await.is_premium);
    let minted = w.moderation.list_keys(&admin).await.unwrap();
    assert_eq!(minted.iter().filter(|k| k.is_used).count(), 1);

    // Second redemption of the same code loses.
    let other = make_user(&w.db, "other").await;
    let err = w.db.keys().activate(other.id, &codes[0]).await.unwrap_err();
    assert!(matches!(err, beegramd::db::DbError::KeyUsed));
    assert!(!refresh(&w.db, other.id).await.is_premium);

    let err = w
        .db
        .keys()
        .activate(other.id, "BEE-DOESNOTEX-IST")
        .await
        .unwrap_err();
    assert!(matches!(err, beegramd::db::DbError::KeyNotFound));
}

#[tokio::test]
async fn early_access_key_opens_the_gate() {
    let w = world().await;
    let admin = make_user(&w.db, "admin").await;
    set_user_flag(&w.db, admin.id, "is_admin", true).await;
    let admin = refresh(&w.db, admin.id).await;
    let codes = w
        .moderation
        .generate_keys(&admin, KeyFamily::EarlyAccess, 1)
        .await
        .unwrap();

    // A user without early access cannot open chats.
    let newcomer = w.db.users().create("newcomer", None).await.unwrap();
    let err = w.pipeline.authorize_join(&newcomer, 1).await.unwrap_err();
    assert!(matches!(err, EventError::EarlyAccessRequired));

    w.db.keys().activate(newcomer.id, &codes[0]).await.unwrap();
    let newcomer = refresh(&w.db, newcomer.id).await;
    assert!(newcomer.is_early_access);
}

#[tokio::test]
async fn moderation_actions_reach_the_audit_trail() {
    let w = world().await;
    let moderator = make_user(&w.db, "mod").await;
    set_user_flag(&w.db, moderator.id, "is_moderator", true).await;
    let moderator = refresh(&w.db, moderator.id).await;
    let target = make_user(&w.db, "target").await;

    w.moderation.ban_user(&moderator, target.id, 5).await.unwrap();
    wait_for_audit(&w.db, "user_ban").await;

    w.moderation.unban_user(&moderator, target.id).await.unwrap();
    wait_for_audit(&w.db, "user_unban").await;
}
