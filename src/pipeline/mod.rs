//! Message delivery pipeline.
//!
//! Every inbound action runs the same ordered stages: rate limit, target
//! resolution, guard chain, payload validation, then the storage write and
//! room broadcast. A stage failure stops the pipeline before anything is
//! persisted, so a rejected message never leaves a partial row behind.

pub mod gift;

use crate::access::{self, Action, GuardContext};
use crate::db::{ChatKind, Database, MessageType, MessageView, User};
use crate::error::{EventError, EventResult};
use crate::events::ServerEvent;
use crate::rooms::{RoomId, RoomRegistry};
use crate::security::{Bucket, RateLimiter};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Which call-signal frame is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSignal {
    Offer,
    Answer,
    Ice,
    Hangup,
}

impl CallSignal {
    fn bucket(&self) -> Bucket {
        match self {
            Self::Offer => Bucket::CallOffer,
            Self::Answer => Bucket::CallAnswer,
            Self::Ice => Bucket::CallIce,
            Self::Hangup => Bucket::CallHangup,
        }
    }
}

/// The delivery pipeline shared by every connection.
pub struct Pipeline {
    db: Database,
    limiter: Arc<RateLimiter>,
    rooms: Arc<RoomRegistry>,
}

impl Pipeline {
    pub fn new(db: Database, limiter: Arc<RateLimiter>, rooms: Arc<RoomRegistry>) -> Self {
        Self { db, limiter, rooms }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    fn admit(&self, user: &User, bucket: Bucket) -> EventResult<()> {
        if self.limiter.admit(&user.id.to_string(), bucket) {
            Ok(())
        } else {
            debug!(user_id = user.id, bucket = bucket.name(), "Rate limited");
            Err(EventError::RateLimited)
        }
    }

    async fn guard_send(&self, user: &User, chat_id: i64) -> EventResult<ChatKind> {
        let chat = self
            .db
            .chats()
            .find(chat_id)
            .await?
            .ok_or(EventError::NotFound("chat"))?;

        if !self.db.chats().is_member(chat_id, user.id).await? {
            return Err(EventError::Forbidden);
        }

        // The cold-outreach check costs a query, so only compute it for
        // the one case the spam-block stage inspects.
        let private_counterpart_posted =
            if chat.kind == ChatKind::Private && user.is_spam_blocked && !user.is_staff() {
                Some(
                    self.db
                        .chats()
                        .counterpart_has_posted(chat_id, user.id)
                        .await?,
                )
            } else {
                None
            };

        let ctx = GuardContext {
            actor: Some(user),
            action: Action::SendMessage,
            now: chrono::Utc::now().timestamp(),
            private_counterpart_posted,
        };
        access::authorize(&ctx).map_err(EventError::from)?;
        Ok(chat.kind)
    }

    fn guard_simple(&self, user: &User, action: Action) -> EventResult<()> {
        let ctx = GuardContext {
            actor: Some(user),
            action,
            now: chrono::Utc::now().timestamp(),
            private_counterpart_posted: None,
        };
        access::authorize(&ctx).map_err(EventError::from)
    }

    /// Accept, persist, and broadcast one message. Returns the broadcast
    /// view. `/gift` commands are intercepted before the plain insert.
    pub async fn send_message(
        &self,
        user: &User,
        chat_id: i64,
        content: &str,
        message_type: MessageType,
        file_url: Option<&str>,
    ) -> EventResult<MessageView> {
        self.admit(user, Bucket::MessageSend)?;
        self.guard_send(user, chat_id).await?;

        let trimmed = content.trim();
        if trimmed.is_empty() && file_url.is_none() {
            return Err(EventError::Validation("Message is empty.".to_string()));
        }
        let limit = user.message_char_limit();
        if trimmed.chars().count() > limit {
            return Err(EventError::Validation(format!(
                "Message is too long (limit {limit} characters)."
            )));
        }

        if message_type == MessageType::Text
            && let Some(cmd) = gift::parse(trimmed)
        {
            return self.deliver_gift(user, chat_id, cmd).await;
        }

        let message_id = self
            .db
            .messages()
            .insert(chat_id, user.id, trimmed, message_type, file_url)
            .await?;
        let view = self.db.messages().fetch_view(message_id).await?;

        self.rooms.broadcast(
            RoomId::Chat(chat_id),
            &ServerEvent::NewMessage {
                message: view.clone(),
            },
        );
        info!(user_id = user.id, chat_id, message_id, "Message delivered");
        Ok(view)
    }

    async fn deliver_gift(
        &self,
        user: &User,
        chat_id: i64,
        cmd: gift::GiftCommand,
    ) -> EventResult<MessageView> {
        if cmd.amount <= 0 {
            return Err(EventError::Validation(
                "Gift amount must be positive.".to_string(),
            ));
        }
        if cmd.receiver_username == user.username {
            return Err(EventError::Validation(
                "You cannot gift bee stars to yourself.".to_string(),
            ));
        }

        let outcome = self
            .db
            .users()
            .gift_transfer(chat_id, user.id, &cmd.receiver_username, cmd.amount)
            .await?;

        let view = self.db.messages().fetch_view(outcome.message_id).await?;
        self.rooms.broadcast(
            RoomId::Chat(chat_id),
            &ServerEvent::NewMessage {
                message: view.clone(),
            },
        );
        // Balance updates fan out to the chat room so everyone watching the
        // conversation sees the new totals.
        self.rooms.broadcast(
            RoomId::Chat(chat_id),
            &ServerEvent::BeeStarsUpdated {
                user_id: user.id,
                balance: outcome.sender_balance,
            },
        );
        let receiver_balance = self.db.users().balance(outcome.receiver_id).await?;
        self.rooms.broadcast(
            RoomId::Chat(chat_id),
            &ServerEvent::BeeStarsUpdated {
                user_id: outcome.receiver_id,
                balance: receiver_balance,
            },
        );
        info!(
            user_id = user.id,
            receiver_id = outcome.receiver_id,
            amount = outcome.amount,
            "Gift delivered"
        );
        Ok(view)
    }

    /// Toggle a reaction and broadcast the message's full reaction set.
    pub async fn add_reaction(
        &self,
        user: &User,
        message_id: i64,
        emoji: &str,
    ) -> EventResult<()> {
        self.admit(user, Bucket::Reaction)?;
        self.guard_simple(user, Action::AddReaction)?;

        let message = self
            .db
            .messages()
            .find(message_id)
            .await?
            .ok_or(EventError::NotFound("message"))?;
        if !self.db.chats().is_member(message.chat_id, user.id).await? {
            return Err(EventError::Forbidden);
        }
        if message.is_deleted {
            return Err(EventError::NotFound("message"));
        }

        let reactions = self
            .db
            .messages()
            .toggle_reaction(message_id, user.id, emoji)
            .await?;
        self.rooms.broadcast(
            RoomId::Chat(message.chat_id),
            &ServerEvent::ReactionsUpdated {
                message_id,
                reactions,
            },
        );
        Ok(())
    }

    /// Relay a typing notice to the chat room. Never persisted.
    pub async fn typing(&self, user: &User, chat_id: i64) -> EventResult<()> {
        self.admit(user, Bucket::Typing)?;
        self.guard_simple(user, Action::Typing)?;
        if !self.db.chats().is_member(chat_id, user.id).await? {
            return Err(EventError::Forbidden);
        }
        self.rooms.broadcast(
            RoomId::Chat(chat_id),
            &ServerEvent::UserTyping {
                chat_id,
                user_id: user.id,
                username: user.display_name().to_string(),
            },
        );
        Ok(())
    }

    /// Soft-delete a message. Only the author or staff may delete; the
    /// tombstone broadcast goes out exactly once, on the call that set it.
    pub async fn delete_message(&self, user: &User, message_id: i64) -> EventResult<()> {
        self.admit(user, Bucket::DeleteMessage)?;
        self.guard_simple(user, Action::DeleteMessage)?;

        let message = self
            .db
            .messages()
            .find(message_id)
            .await?
            .ok_or(EventError::NotFound("message"))?;
        if message.user_id != user.id && !user.is_staff() {
            return Err(EventError::Forbidden);
        }

        let newly_deleted = self.db.messages().soft_delete(message_id, user.id).await?;
        if newly_deleted {
            self.rooms.broadcast(
                RoomId::Chat(message.chat_id),
                &ServerEvent::MessageDeleted {
                    chat_id: message.chat_id,
                    message_id,
                },
            );
            info!(user_id = user.id, message_id, "Message deleted");
        }
        Ok(())
    }

    /// Validate chat membership for a room join.
    pub async fn authorize_join(&self, user: &User, chat_id: i64) -> EventResult<()> {
        self.guard_simple(user, Action::OpenChat)?;
        if !self.db.chats().is_member(chat_id, user.id).await? {
            return Err(EventError::Forbidden);
        }
        Ok(())
    }

    /// Relay one call-signaling frame to the target user's room. Payloads
    /// pass through opaquely.
    pub async fn relay_call(
        &self,
        user: &User,
        signal: CallSignal,
        target_user_id: i64,
        payload: Value,
    ) -> EventResult<()> {
        self.admit(user, signal.bucket())?;
        self.guard_simple(user, Action::CallSignal)?;

        if self.db.users().find(target_user_id).await?.is_none() {
            return Err(EventError::NotFound("user"));
        }

        let event = match signal {
            CallSignal::Offer => ServerEvent::IncomingCallOffer {
                from_user_id: user.id,
                payload,
            },
            CallSignal::Answer => ServerEvent::IncomingCallAnswer {
                from_user_id: user.id,
                payload,
            },
            CallSignal::Ice => ServerEvent::IncomingCallIce {
                from_user_id: user.id,
                payload,
            },
            CallSignal::Hangup => ServerEvent::CallEnded {
                from_user_id: user.id,
            },
        };
        self.rooms.broadcast(RoomId::User(target_user_id), &event);
        Ok(())
    }
}
