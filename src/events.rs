//! Wire events exchanged with clients.
//!
//! Frames are newline-delimited JSON objects tagged with an `event` field.

use crate::db::{MessageView, ReactionView};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_message_type() -> String {
    "text".to_owned()
}

/// Events a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Auth {
        token: String,
    },
    JoinChat {
        chat_id: i64,
    },
    LeaveChat {
        chat_id: i64,
    },
    SendMessage {
        chat_id: i64,
        content: String,
        #[serde(default = "default_message_type")]
        message_type: String,
        #[serde(default)]
        file_url: Option<String>,
    },
    AddReaction {
        message_id: i64,
        emoji: String,
    },
    Typing {
        chat_id: i64,
    },
    DeleteMessage {
        message_id: i64,
    },
    ReportMessage {
        message_id: i64,
        reason: String,
    },
    CallOffer {
        target_user_id: i64,
        payload: Value,
    },
    CallAnswer {
        target_user_id: i64,
        payload: Value,
    },
    CallIce {
        target_user_id: i64,
        payload: Value,
    },
    CallHangup {
        target_user_id: i64,
    },
}

impl ClientEvent {
    /// Wire name, for spans and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::SendMessage { .. } => "send_message",
            Self::AddReaction { .. } => "add_reaction",
            Self::Typing { .. } => "typing",
            Self::DeleteMessage { .. } => "delete_message",
            Self::ReportMessage { .. } => "report_message",
            Self::CallOffer { .. } => "call_offer",
            Self::CallAnswer { .. } => "call_answer",
            Self::CallIce { .. } => "call_ice",
            Self::CallHangup { .. } => "call_hangup",
        }
    }
}

/// Events the server broadcasts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Authed {
        user_id: i64,
        username: String,
    },
    JoinedChat {
        chat_id: i64,
    },
    NewMessage {
        message: MessageView,
    },
    MessageDeleted {
        chat_id: i64,
        message_id: i64,
    },
    ReactionsUpdated {
        message_id: i64,
        reactions: Vec<ReactionView>,
    },
    UserTyping {
        chat_id: i64,
        user_id: i64,
        username: String,
    },
    BeeStarsUpdated {
        user_id: i64,
        balance: i64,
    },
    ReportFiled {
        report_id: i64,
    },
    IncomingCallOffer {
        from_user_id: i64,
        payload: Value,
    },
    IncomingCallAnswer {
        from_user_id: i64,
        payload: Value,
    },
    IncomingCallIce {
        from_user_id: i64,
        payload: Value,
    },
    CallEnded {
        from_user_id: i64,
    },
    MessageError {
        reason: String,
    },
}

impl ServerEvent {
    /// Wire name, for spans and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authed { .. } => "authed",
            Self::JoinedChat { .. } => "joined_chat",
            Self::NewMessage { .. } => "new_message",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ReactionsUpdated { .. } => "reactions_updated",
            Self::UserTyping { .. } => "user_typing",
            Self::BeeStarsUpdated { .. } => "bee_stars_updated",
            Self::ReportFiled { .. } => "report_filed",
            Self::IncomingCallOffer { .. } => "incoming_call_offer",
            Self::IncomingCallAnswer { .. } => "incoming_call_answer",
            Self::IncomingCallIce { .. } => "incoming_call_ice",
            Self::CallEnded { .. } => "call_ended",
            Self::MessageError { .. } => "message_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_names() {
        let frame = r#"{"event":"send_message","chat_id":3,"content":"hi"}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::SendMessage {
                chat_id,
                content,
                message_type,
                file_url,
            } => {
                assert_eq!(chat_id, 3);
                assert_eq!(content, "hi");
                assert_eq!(message_type, "text");
                assert!(file_url.is_none());
            }
            other => panic!("unexpected event: {}", other.name()),
        }
    }

    #[test]
    fn unknown_client_event_is_rejected() {
        let frame = r#"{"event":"reboot_server"}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn server_event_serializes_with_tag() {
        let event = ServerEvent::BeeStarsUpdated {
            user_id: 5,
            balance: 120,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bee_stars_updated");
        assert_eq!(json["balance"], 120);
    }
}
