// tests/gateway_flow.rs
//! Gateway sessions over real TCP: the auth handshake and moderation
//! effects landing while a connection stays open.

mod common;

use beegramd::config::{LimitsConfig, ModerationConfig};
use beegramd::db::Database;
use beegramd::gateway::Gateway;
use beegramd::moderation::{AuditSink, ModerationEngine};
use beegramd::pipeline::Pipeline;
use beegramd::rooms::RoomRegistry;
use beegramd::security::{IpAbuseTracker, RateLimiter};
use common::{make_user, refresh, set_user_flag};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

struct GatewayWorld {
    db: Database,
    moderation: Arc<ModerationEngine>,
    addr: SocketAddr,
}

/// Stand up a full gateway on an ephemeral port and run it in the
/// background for the rest of the test.
async fn spawn_gateway() -> GatewayWorld {
    let db = Database::new(":memory:").await.expect("in-memory database");
    db.seed_defaults().await.expect("seed defaults");

    let rooms = Arc::new(RoomRegistry::new());
    let limiter = Arc::new(RateLimiter::new(LimitsConfig::default()));
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        Arc::clone(&limiter),
        Arc::clone(&rooms),
    ));
    let audit = AuditSink::spawn(db.clone());
    let moderation = Arc::new(ModerationEngine::new(
        db.clone(),
        Arc::clone(&rooms),
        audit,
        ModerationConfig::default(),
    ));
    let tracker = Arc::new(IpAbuseTracker::new(db.clone()));

    let gateway = Gateway::bind(
        "127.0.0.1:0".parse().unwrap(),
        db.clone(),
        pipeline,
        Arc::clone(&moderation),
        rooms,
        limiter,
        tracker,
    )
    .await
    .expect("bind gateway");
    let addr = gateway.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = gateway.run().await;
    });

    GatewayWorld {
        db,
        moderation,
        addr,
    }
}

type Client = Framed<TcpStream, LinesCodec>;

async fn raw_connect(addr: SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.expect("connect");
    Framed::new(stream, LinesCodec::new())
}

/// Connect and complete the handshake for a known session token.
async fn connect(addr: SocketAddr, token: &str) -> Client {
    let mut client = raw_connect(addr).await;
    send(&mut client, json!({"event": "auth", "token": token})).await;
    let authed = recv(&mut client).await;
    assert_eq!(authed["event"], "authed");
    client
}

async fn send(client: &mut Client, frame: Value) {
    client.send(frame.to_string()).await.expect("send frame");
}

async fn recv(client: &mut Client) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .expect("read frame");
    serde_json::from_str(&line).expect("frame is JSON")
}

async fn expect_no_frame(client: &mut Client) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(outcome.is_err(), "unexpected frame: {outcome:?}");
}

#[tokio::test]
async fn session_handshake_and_room_delivery() {
    let w = spawn_gateway().await;
    let alice = make_user(&w.db, "alice").await;
    let bob = make_user(&w.db, "bob").await;
    let chat_id = w
        .db
        .chats()
        .get_or_create_private(alice.id, bob.id)
        .await
        .unwrap();
    w.db.users().insert_session(alice.id, "tok-alice").await.unwrap();
    w.db.users().insert_session(bob.id, "tok-bob").await.unwrap();

    let mut alice_conn = connect(w.addr, "tok-alice").await;
    let mut bob_conn = connect(w.addr, "tok-bob").await;
    for conn in [&mut alice_conn, &mut bob_conn] {
        send(conn, json!({"event": "join_chat", "chat_id": chat_id})).await;
        let joined = recv(conn).await;
        assert_eq!(joined["event"], "joined_chat");
        assert_eq!(joined["chat_id"], chat_id);
    }

    send(
        &mut alice_conn,
        json!({"event": "send_message", "chat_id": chat_id, "content": "hello bob"}),
    )
    .await;

    let frame = recv(&mut bob_conn).await;
    assert_eq!(frame["event"], "new_message");
    assert_eq!(frame["message"]["content"], "hello bob");
    assert_eq!(frame["message"]["author_username"], "alice");
    // The sender is in the room too and sees her own message.
    let echo = recv(&mut alice_conn).await;
    assert_eq!(echo["event"], "new_message");
}

#[tokio::test]
async fn bad_token_is_rejected_at_handshake() {
    let w = spawn_gateway().await;
    let mut client = raw_connect(w.addr).await;
    send(&mut client, json!({"event": "auth", "token": "no-such"})).await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["event"], "message_error");
}

#[tokio::test]
async fn mid_session_ban_rejects_the_next_send() {
    let w = spawn_gateway().await;
    let alice = make_user(&w.db, "alice").await;
    let bob = make_user(&w.db, "bob").await;
    let chat_id = w
        .db
        .chats()
        .get_or_create_private(alice.id, bob.id)
        .await
        .unwrap();
    w.db.users().insert_session(alice.id, "tok-alice").await.unwrap();
    w.db.users().insert_session(bob.id, "tok-bob").await.unwrap();
    let moderator = make_user(&w.db, "hivewarden").await;
    set_user_flag(&w.db, moderator.id, "is_moderator", true).await;
    let moderator = refresh(&w.db, moderator.id).await;

    let mut alice_conn = connect(w.addr, "tok-alice").await;
    let mut bob_conn = connect(w.addr, "tok-bob").await;
    for conn in [&mut alice_conn, &mut bob_conn] {
        send(conn, json!({"event": "join_chat", "chat_id": chat_id})).await;
        assert_eq!(recv(conn).await["event"], "joined_chat");
    }

    send(
        &mut alice_conn,
        json!({"event": "send_message", "chat_id": chat_id, "content": "before"}),
    )
    .await;
    assert_eq!(recv(&mut alice_conn).await["event"], "new_message");
    assert_eq!(recv(&mut bob_conn).await["event"], "new_message");

    // The ban lands while alice's connection stays open; her very next
    // send must already be refused.
    w.moderation
        .ban_user(&moderator, alice.id, 10)
        .await
        .unwrap();

    send(
        &mut alice_conn,
        json!({"event": "send_message", "chat_id": chat_id, "content": "after"}),
    )
    .await;
    let frame = recv(&mut alice_conn).await;
    assert_eq!(frame["event"], "message_error");
    assert!(
        frame["reason"].as_str().unwrap().contains("banned"),
        "unexpected reason: {frame}"
    );
    expect_no_frame(&mut bob_conn).await;
    assert_eq!(w.db.messages().list_chat(chat_id).await.unwrap().len(), 1);
}
