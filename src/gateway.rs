//! Gateway - TCP listener speaking newline-delimited JSON events.
//!
//! The gateway accepts connections, runs the IP deny check and the
//! connect rate limit before spawning anything, then drives one task per
//! connection. The first frame must be an `auth` event; everything after
//! that flows through the delivery pipeline.

use crate::db::{Database, MessageType, User};
use crate::error::EventError;
use crate::events::{ClientEvent, ServerEvent};
use crate::moderation::ModerationEngine;
use crate::pipeline::{CallSignal, Pipeline};
use crate::rooms::{RoomId, RoomRegistry};
use crate::security::{Bucket, IpAbuseTracker, RateLimiter};
use crate::telemetry::spans;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{Instrument, debug, error, info, warn};

/// Maximum length of one inbound frame in bytes.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// The gateway accepts incoming TCP connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    db: Database,
    pipeline: Arc<Pipeline>,
    moderation: Arc<ModerationEngine>,
    rooms: Arc<RoomRegistry>,
    limiter: Arc<RateLimiter>,
    tracker: Arc<IpAbuseTracker>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(
        addr: SocketAddr,
        db: Database,
        pipeline: Arc<Pipeline>,
        moderation: Arc<ModerationEngine>,
        rooms: Arc<RoomRegistry>,
        limiter: Arc<RateLimiter>,
        tracker: Arc<IpAbuseTracker>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Gateway listener bound");
        Ok(Self {
            listener,
            db,
            pipeline,
            moderation,
            rooms,
            limiter,
            tracker,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections forever.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
            };

            // Deny check runs before anything is spawned for this peer.
            if let Some(reason) = self.tracker.is_blocked(addr.ip()) {
                info!(%addr, %reason, "Connection rejected by IP block list");
                self.tracker.record_event(addr.ip(), "blocked_connect").await;
                drop(stream);
                continue;
            }

            if !self.limiter.admit(&addr.ip().to_string(), Bucket::Connect) {
                warn!(%addr, "Connection rate limit exceeded - rejecting");
                self.tracker.record_event(addr.ip(), "connect_flood").await;
                drop(stream);
                continue;
            }

            let conn_id = self.rooms.next_conn_id();
            let handler = ConnectionHandler {
                db: self.db.clone(),
                pipeline: Arc::clone(&self.pipeline),
                moderation: Arc::clone(&self.moderation),
                rooms: Arc::clone(&self.rooms),
                limiter: Arc::clone(&self.limiter),
                tracker: Arc::clone(&self.tracker),
                conn_id,
                addr,
            };
            let span = spans::connection(conn_id, &addr.ip().to_string());
            tokio::spawn(
                async move {
                    if let Err(e) = handler.run(stream).await {
                        debug!(error = %e, "Connection closed with error");
                    }
                }
                .instrument(span),
            );
        }
    }
}

struct ConnectionHandler {
    db: Database,
    pipeline: Arc<Pipeline>,
    moderation: Arc<ModerationEngine>,
    rooms: Arc<RoomRegistry>,
    limiter: Arc<RateLimiter>,
    tracker: Arc<IpAbuseTracker>,
    conn_id: u64,
    addr: SocketAddr,
}

impl ConnectionHandler {
    async fn run(self, stream: TcpStream) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

        // Handshake: the first frame must authenticate.
        let user = match self.authenticate(&mut framed).await? {
            Some(user) => user,
            None => return Ok(()),
        };

        info!(user_id = user.id, username = %user.username, "Client authenticated");
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
        self.rooms.join(RoomId::User(user.id), self.conn_id, tx.clone());

        let authed = ServerEvent::Authed {
            user_id: user.id,
            username: user.username.clone(),
        };
        framed.send(serde_json::to_string(&authed)?).await?;

        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(event) = outbound else { break };
                    framed.send(serde_json::to_string(&event)?).await?;
                }
                inbound = framed.next() => {
                    let Some(line) = inbound else { break };
                    let line = line?;
                    // Moderation flags can change while the connection is
                    // open; the actor row is re-read per frame so a fresh
                    // ban or revocation bites on the very next action.
                    let Some(actor) = self.db.users().find(user.id).await? else {
                        break;
                    };
                    if let Some(reply) = self.handle_frame(&actor, &tx, &line).await {
                        framed.send(serde_json::to_string(&reply)?).await?;
                    }
                }
            }
        }

        self.rooms.leave_all(self.conn_id);
        info!(user_id = user.id, "Client disconnected");
        Ok(())
    }

    /// Read and validate the auth frame. `None` means the handshake failed
    /// and an error was already sent.
    async fn authenticate(
        &self,
        framed: &mut Framed<TcpStream, LinesCodec>,
    ) -> anyhow::Result<Option<User>> {
        // Auth attempts share the login quota with the account service's
        // credential endpoints, keyed by source address.
        if !self
            .limiter
            .admit(&self.addr.ip().to_string(), Bucket::Login)
        {
            let reject = ServerEvent::MessageError {
                reason: EventError::RateLimited.client_reason(),
            };
            framed.send(serde_json::to_string(&reject)?).await?;
            self.tracker.record_event(self.addr.ip(), "login_flood").await;
            return Ok(None);
        }

        let Some(first) = framed.next().await else {
            return Ok(None);
        };
        let first = first?;

        let token = match serde_json::from_str::<ClientEvent>(&first) {
            Ok(ClientEvent::Auth { token }) => token,
            _ => {
                let reject = ServerEvent::MessageError {
                    reason: EventError::Unauthenticated.client_reason(),
                };
                framed.send(serde_json::to_string(&reject)?).await?;
                self.tracker.record_event(self.addr.ip(), "bad_handshake").await;
                return Ok(None);
            }
        };

        match self.db.users().identity_from_session(&token).await {
            Ok(Some(user)) => Ok(Some(user)),
            Ok(None) => {
                let reject = ServerEvent::MessageError {
                    reason: EventError::Unauthenticated.client_reason(),
                };
                framed.send(serde_json::to_string(&reject)?).await?;
                self.tracker.record_event(self.addr.ip(), "auth_failure").await;
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                let reject = ServerEvent::MessageError {
                    reason: EventError::Db(e).client_reason(),
                };
                framed.send(serde_json::to_string(&reject)?).await?;
                Ok(None)
            }
        }
    }

    /// Dispatch one inbound frame. Returns a direct reply for the
    /// originating connection, if any; broadcasts go through the registry.
    async fn handle_frame(
        &self,
        user: &User,
        tx: &mpsc::UnboundedSender<ServerEvent>,
        line: &str,
    ) -> Option<ServerEvent> {
        let event = match serde_json::from_str::<ClientEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                debug!(user_id = user.id, error = %e, "Unparseable frame");
                return Some(ServerEvent::MessageError {
                    reason: "Unrecognized event.".to_string(),
                });
            }
        };

        let span = spans::event(event.name(), user.id);
        let result = self.dispatch(user, tx, event).instrument(span).await;
        match result {
            Ok(reply) => reply,
            Err(e) => {
                debug!(user_id = user.id, code = e.error_code(), "Event rejected");
                Some(ServerEvent::MessageError {
                    reason: e.client_reason(),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        user: &User,
        tx: &mpsc::UnboundedSender<ServerEvent>,
        event: ClientEvent,
    ) -> Result<Option<ServerEvent>, EventError> {
        match event {
            ClientEvent::Auth { .. } => Ok(None),
            ClientEvent::JoinChat { chat_id } => {
                self.pipeline.authorize_join(user, chat_id).await?;
                self.rooms
                    .join(RoomId::Chat(chat_id), self.conn_id, tx.clone());
                self.db.messages().mark_read(chat_id, user.id).await?;
                Ok(Some(ServerEvent::JoinedChat { chat_id }))
            }
            ClientEvent::LeaveChat { chat_id } => {
                self.rooms.leave(RoomId::Chat(chat_id), self.conn_id);
                Ok(None)
            }
            ClientEvent::SendMessage {
                chat_id,
                content,
                message_type,
                file_url,
            } => {
                self.pipeline
                    .send_message(
                        user,
                        chat_id,
                        &content,
                        MessageType::parse(&message_type),
                        file_url.as_deref(),
                    )
                    .await?;
                Ok(None)
            }
            ClientEvent::AddReaction { message_id, emoji } => {
                self.pipeline.add_reaction(user, message_id, &emoji).await?;
                Ok(None)
            }
            ClientEvent::Typing { chat_id } => {
                self.pipeline.typing(user, chat_id).await?;
                Ok(None)
            }
            ClientEvent::DeleteMessage { message_id } => {
                self.pipeline.delete_message(user, message_id).await?;
                Ok(None)
            }
            ClientEvent::ReportMessage { message_id, reason } => {
                let report_id = self
                    .moderation
                    .submit_report(user, message_id, &reason)
                    .await?;
                Ok(Some(ServerEvent::ReportFiled { report_id }))
            }
            ClientEvent::CallOffer {
                target_user_id,
                payload,
            } => {
                self.pipeline
                    .relay_call(user, CallSignal::Offer, target_user_id, payload)
                    .await?;
                Ok(None)
            }
            ClientEvent::CallAnswer {
                target_user_id,
                payload,
            } => {
                self.pipeline
                    .relay_call(user, CallSignal::Answer, target_user_id, payload)
                    .await?;
                Ok(None)
            }
            ClientEvent::CallIce {
                target_user_id,
                payload,
            } => {
                self.pipeline
                    .relay_call(user, CallSignal::Ice, target_user_id, payload)
                    .await?;
                Ok(None)
            }
            ClientEvent::CallHangup { target_user_id } => {
                self.pipeline
                    .relay_call(
                        user,
                        CallSignal::Hangup,
                        target_user_id,
                        serde_json::Value::Null,
                    )
                    .await?;
                Ok(None)
            }
        }
    }
}
