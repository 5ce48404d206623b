//! Ordered guard chain deciding whether an actor may perform an action.
//!
//! Stages run in a fixed order and the first stage that returns a denial
//! wins; later stages never execute. Keeping the stages pure functions
//! over a prebuilt context makes the ordering trivially testable.

use crate::db::User;
use crate::error::EventError;

/// Actions subject to the guard chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Index,
    Login,
    Register,
    ActivateKey,
    ViewChats,
    OpenChat,
    SendMessage,
    AddReaction,
    Typing,
    DeleteMessage,
    CallSignal,
    EditProfile,
    SubmitReport,
    SearchChannels,
}

impl Action {
    /// Public actions bypass authentication entirely. Key activation is
    /// public so a fresh account can redeem its early-access key before
    /// anything else.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Self::Index | Self::Login | Self::Register | Self::ActivateKey
        )
    }

    /// Actions that put new content in front of other users. Bans and the
    /// spam block only bite here.
    pub fn sends_message(&self) -> bool {
        matches!(self, Self::SendMessage | Self::CallSignal)
    }

    /// Actions behind the early-access gate.
    pub fn requires_full_access(&self) -> bool {
        matches!(
            self,
            Self::ViewChats
                | Self::OpenChat
                | Self::SendMessage
                | Self::AddReaction
                | Self::Typing
                | Self::DeleteMessage
                | Self::CallSignal
                | Self::EditProfile
                | Self::SubmitReport
                | Self::SearchChannels
        )
    }
}

/// Why a guard stage refused the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    Banned { minutes_remaining: i64 },
    EarlyAccessRequired,
    SpamBlocked,
}

impl From<DenyReason> for EventError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => EventError::Unauthenticated,
            DenyReason::Banned { minutes_remaining } => EventError::Banned { minutes_remaining },
            DenyReason::EarlyAccessRequired => EventError::EarlyAccessRequired,
            DenyReason::SpamBlocked => EventError::SpamBlocked,
        }
    }
}

/// Everything a guard stage may inspect, gathered before the chain runs.
pub struct GuardContext<'a> {
    pub actor: Option<&'a User>,
    pub action: Action,
    /// Unix timestamp the ban check evaluates against.
    pub now: i64,
    /// For `SendMessage` into a private chat: whether the other member has
    /// ever posted. `None` for group/channel sends and every other action.
    pub private_counterpart_posted: Option<bool>,
}

type Stage = fn(&GuardContext<'_>) -> Option<DenyReason>;

fn stage_authentication(ctx: &GuardContext<'_>) -> Option<DenyReason> {
    if ctx.action.is_public() || ctx.actor.is_some() {
        None
    } else {
        Some(DenyReason::Unauthenticated)
    }
}

fn stage_ban(ctx: &GuardContext<'_>) -> Option<DenyReason> {
    if !ctx.action.sends_message() {
        return None;
    }
    let actor = ctx.actor?;
    if actor.is_admin {
        return None;
    }
    actor
        .ban_minutes_remaining(ctx.now)
        .map(|minutes_remaining| DenyReason::Banned { minutes_remaining })
}

fn stage_early_access(ctx: &GuardContext<'_>) -> Option<DenyReason> {
    if !ctx.action.requires_full_access() {
        return None;
    }
    let actor = ctx.actor?;
    if actor.is_early_access || actor.is_staff() {
        None
    } else {
        Some(DenyReason::EarlyAccessRequired)
    }
}

fn stage_spam_block(ctx: &GuardContext<'_>) -> Option<DenyReason> {
    if ctx.action != Action::SendMessage {
        return None;
    }
    let actor = ctx.actor?;
    if !actor.is_spam_blocked || actor.is_staff() {
        return None;
    }
    // Only cold outreach is blocked: a private chat where the other side
    // has never spoken. Group and channel sends carry no counterpart flag
    // and pass through.
    match ctx.private_counterpart_posted {
        Some(false) => Some(DenyReason::SpamBlocked),
        _ => None,
    }
}

/// Guard stages in evaluation order. First denial wins.
const STAGES: &[Stage] = &[
    stage_authentication,
    stage_ban,
    stage_early_access,
    stage_spam_block,
];

/// Run the guard chain. `Ok(())` means every stage allowed the action.
pub fn authorize(ctx: &GuardContext<'_>) -> Result<(), DenyReason> {
    for stage in STAGES {
        if let Some(reason) = stage(ctx) {
            return Err(reason);
        }
    }
    Ok(())
}

/// Require the moderator or admin flag.
pub fn require_moderator(actor: &User) -> Result<(), EventError> {
    if actor.is_staff() {
        Ok(())
    } else {
        Err(EventError::Forbidden)
    }
}

/// Require the admin flag.
pub fn require_admin(actor: &User) -> Result<(), EventError> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(EventError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            username: "worker".into(),
            nickname: None,
            bio: None,
            status: "online".into(),
            avatar: "🐝".into(),
            theme: "light".into(),
            is_premium: false,
            is_early_access: true,
            is_admin: false,
            is_moderator: false,
            is_spam_blocked: false,
            banned_until: None,
            bee_stars: 100,
            created_at: 0,
        }
    }

    fn ctx<'a>(actor: Option<&'a User>, action: Action) -> GuardContext<'a> {
        GuardContext {
            actor,
            action,
            now: 1_000_000,
            private_counterpart_posted: None,
        }
    }

    #[test]
    fn public_actions_skip_authentication() {
        assert_eq!(authorize(&ctx(None, Action::Login)), Ok(()));
        assert_eq!(authorize(&ctx(None, Action::ActivateKey)), Ok(()));
        assert_eq!(
            authorize(&ctx(None, Action::SendMessage)),
            Err(DenyReason::Unauthenticated)
        );
    }

    #[test]
    fn ban_denies_sending_but_not_reading() {
        let mut u = user();
        u.banned_until = Some(1_000_000 + 600);
        assert_eq!(
            authorize(&ctx(Some(&u), Action::SendMessage)),
            Err(DenyReason::Banned {
                minutes_remaining: 10
            })
        );
        assert_eq!(authorize(&ctx(Some(&u), Action::OpenChat)), Ok(()));
    }

    #[test]
    fn admins_are_exempt_from_bans() {
        let mut u = user();
        u.is_admin = true;
        u.banned_until = Some(1_000_000 + 600);
        assert_eq!(authorize(&ctx(Some(&u), Action::SendMessage)), Ok(()));
    }

    #[test]
    fn expired_ban_no_longer_denies() {
        let mut u = user();
        u.banned_until = Some(999_999);
        assert_eq!(authorize(&ctx(Some(&u), Action::SendMessage)), Ok(()));
    }

    #[test]
    fn early_access_gate() {
        let mut u = user();
        u.is_early_access = false;
        assert_eq!(
            authorize(&ctx(Some(&u), Action::OpenChat)),
            Err(DenyReason::EarlyAccessRequired)
        );
        assert_eq!(authorize(&ctx(Some(&u), Action::ActivateKey)), Ok(()));

        u.is_moderator = true;
        assert_eq!(authorize(&ctx(Some(&u), Action::OpenChat)), Ok(()));
    }

    #[test]
    fn spam_block_allows_replies_only() {
        let mut u = user();
        u.is_spam_blocked = true;

        let mut c = ctx(Some(&u), Action::SendMessage);
        c.private_counterpart_posted = Some(false);
        assert_eq!(authorize(&c), Err(DenyReason::SpamBlocked));

        c.private_counterpart_posted = Some(true);
        assert_eq!(authorize(&c), Ok(()));

        // Group and channel sends never populate the counterpart flag
        // and are not cold outreach.
        c.private_counterpart_posted = None;
        assert_eq!(authorize(&c), Ok(()));
    }

    #[test]
    fn ban_outranks_spam_block() {
        let mut u = user();
        u.is_spam_blocked = true;
        u.banned_until = Some(1_000_000 + 60);
        let mut c = ctx(Some(&u), Action::SendMessage);
        c.private_counterpart_posted = Some(false);
        assert!(matches!(authorize(&c), Err(DenyReason::Banned { .. })));
    }

    #[test]
    fn staff_bypass_spam_block() {
        let mut u = user();
        u.is_spam_blocked = true;
        u.is_admin = true;
        let c = ctx(Some(&u), Action::SendMessage);
        assert_eq!(authorize(&c), Ok(()));
    }

    #[test]
    fn moderator_requirements() {
        let u = user();
        assert!(require_moderator(&u).is_err());
        assert!(require_admin(&u).is_err());

        let mut m = user();
        m.is_moderator = true;
        assert!(require_moderator(&m).is_ok());
        assert!(require_admin(&m).is_err());
    }
}
