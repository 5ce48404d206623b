//! Unified error handling for beegramd.
//!
//! Every inbound action resolves to either a success or an `EventError`.
//! Errors are caught at the boundary of each action and turned into a
//! structured rejection for the originating caller only; they are never
//! broadcast to a room.

use crate::db::DbError;
use thiserror::Error;

/// Errors that can occur while processing an inbound event or request.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("early access required")]
    EarlyAccessRequired,

    #[error("banned for {minutes_remaining} more minutes")]
    Banned { minutes_remaining: i64 },

    #[error("spam blocked")]
    SpamBlocked,

    #[error("rate limited")]
    RateLimited,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Db(DbError),
}

impl EventError {
    /// Stable error code string for logging and metrics labels.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::EarlyAccessRequired => "early_access_required",
            Self::Banned { .. } => "banned",
            Self::SpamBlocked => "spam_blocked",
            Self::RateLimited => "rate_limited",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Db(_) => "internal_error",
        }
    }

    /// Human-readable reason delivered to the originating connection.
    ///
    /// Storage failures are reported generically; the detail stays in the
    /// server log.
    pub fn client_reason(&self) -> String {
        match self {
            Self::Unauthenticated => "You are not signed in.".to_string(),
            Self::Forbidden => "You do not have permission to do that.".to_string(),
            Self::EarlyAccessRequired => {
                "This area of BeeGramm requires an early-access key.".to_string()
            }
            Self::Banned { minutes_remaining } => {
                format!("You are banned for {minutes_remaining} more minutes.")
            }
            Self::SpamBlocked => {
                "You may only reply in conversations the other person has written in.".to_string()
            }
            Self::RateLimited => "You are doing that too often. Please wait.".to_string(),
            Self::Validation(reason) => reason.clone(),
            Self::NotFound(what) => format!("{what} not found."),
            Self::Conflict(reason) => reason.clone(),
            Self::Db(_) => "Internal server error. Please try again.".to_string(),
        }
    }
}

impl From<DbError> for EventError {
    fn from(err: DbError) -> Self {
        // Typed repository failures surface as client-level rejections;
        // everything else is an internal storage error.
        match err {
            DbError::UserNotFound(_) => Self::NotFound("user"),
            DbError::MessageNotFound(_) => Self::NotFound("message"),
            DbError::ChatNotFound(_) => Self::NotFound("chat"),
            DbError::ReportNotFound(_) => Self::NotFound("report"),
            DbError::KeyNotFound => Self::NotFound("key"),
            DbError::KeyUsed => Self::Conflict("This key has already been used.".to_string()),
            DbError::KeyCapReached { family, unused } => Self::Conflict(format!(
                "Too many unused {family} keys outstanding ({unused}). Use some first."
            )),
            DbError::SelfChat => {
                Self::Validation("You cannot start a chat with yourself.".to_string())
            }
            DbError::NotAChannel(_) => {
                Self::Validation("You can only subscribe to channels.".to_string())
            }
            DbError::AlreadySubscribed => {
                Self::Conflict("Already subscribed to this channel.".to_string())
            }
            DbError::NotSubscribed => Self::NotFound("subscription"),
            DbError::InsufficientFunds { balance, requested } => Self::Validation(format!(
                "Not enough bee stars: you have {balance}, tried to send {requested}."
            )),
            other => Self::Db(other),
        }
    }
}

/// Result type for event processing.
pub type EventResult<T> = Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(EventError::Unauthenticated.error_code(), "unauthenticated");
        assert_eq!(
            EventError::Banned {
                minutes_remaining: 5
            }
            .error_code(),
            "banned"
        );
        assert_eq!(
            EventError::Validation("x".into()).error_code(),
            "validation_error"
        );
    }

    #[test]
    fn banned_reason_includes_minutes() {
        let reason = EventError::Banned {
            minutes_remaining: 10,
        }
        .client_reason();
        assert!(reason.contains("10"));
    }

    #[test]
    fn typed_db_errors_become_client_rejections() {
        let err: EventError = DbError::KeyUsed.into();
        assert_eq!(err.error_code(), "conflict");

        let err: EventError = DbError::InsufficientFunds {
            balance: 3,
            requested: 9,
        }
        .into();
        assert_eq!(err.error_code(), "validation_error");
        assert!(err.client_reason().contains('3'));
    }
}
