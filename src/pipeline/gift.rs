//! `/gift` command parsing.

/// A parsed gift command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftCommand {
    pub receiver_username: String,
    pub amount: i64,
}

/// Parse `/gift <username> <amount>` from message text.
///
/// Returns `None` unless the text is exactly the command with two
/// arguments and an integer amount; anything else is delivered as a plain
/// message. A leading `@` on the username is stripped. The amount may
/// still be non-positive here - the transfer path rejects that with a
/// validation error rather than falling through to plain delivery.
pub fn parse(content: &str) -> Option<GiftCommand> {
    let mut parts = content.trim().split_whitespace();
    if parts.next()? != "/gift" {
        return None;
    }
    let username = parts.next()?;
    let amount: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let receiver_username = username.strip_prefix('@').unwrap_or(username);
    if receiver_username.is_empty() {
        return None;
    }

    Some(GiftCommand {
        receiver_username: receiver_username.to_owned(),
        amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_at_prefixed_usernames() {
        let cmd = parse("/gift honeybadger 25").unwrap();
        assert_eq!(cmd.receiver_username, "honeybadger");
        assert_eq!(cmd.amount, 25);

        let cmd = parse("  /gift @queen 1  ").unwrap();
        assert_eq!(cmd.receiver_username, "queen");
    }

    #[test]
    fn malformed_commands_fall_through() {
        assert_eq!(parse("/gift"), None);
        assert_eq!(parse("/gift queen"), None);
        assert_eq!(parse("/gift queen lots"), None);
        assert_eq!(parse("/gift queen 5 extra"), None);
        assert_eq!(parse("/gift @ 5"), None);
        assert_eq!(parse("gift queen 5"), None);
        assert_eq!(parse("tell me about /gift queen 5"), None);
    }

    #[test]
    fn non_positive_amounts_still_parse() {
        assert_eq!(parse("/gift queen 0").unwrap().amount, 0);
        assert_eq!(parse("/gift queen -3").unwrap().amount, -3);
    }
}
