//! Command tokenizer.
//!
//! Mentions use the `<@id>` form. `<@!id>` (nickname mention) is the same user
//! mention, `<@&id>` is a role mention. Platform adapters rewrite their native
//! mention syntax into this form before messages reach the dispatcher.

/// A mention token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mention {
    User(u64),
    Role(u64),
}

/// Parse a whole token as a mention. Anything else, including a mention with
/// trailing punctuation, is a plain word.
pub fn parse_mention(token: &str) -> Option<Mention> {
    let inner = token.strip_prefix("<@")?.strip_suffix('>')?;
    let (role, digits) = match inner.as_bytes().first()? {
        b'!' => (false, &inner[1..]),
        b'&' => (true, &inner[1..]),
        _ => (false, inner),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = digits.parse().ok()?;
    Some(if role { Mention::Role(id) } else { Mention::User(id) })
}

/// The canonical self-mention token for a bot
pub fn self_mention(bot_id: u64) -> String {
    format!("<@{}>", bot_id)
}

/// True if any space-separated token of `text` mentions `user_id`.
/// Tokens are split exactly as [`parse_command`] splits them.
pub fn mentions_user(text: &str, user_id: u64) -> bool {
    text.split(' ')
        .any(|token| parse_mention(token) == Some(Mention::User(user_id)))
}

/// A tokenized command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lower-cased command word
    pub name: String,
    pub raw_arguments: Vec<String>,
    pub cleaned_arguments: Vec<String>,
}

/// Tokenize a command line.
///
/// Strips `prefix` once if the text starts with it, splits on single spaces and
/// sorts tokens into raw and cleaned lists. Mentions of `bot_id` are dropped from
/// both lists, other mentions are kept in raw only. Returns `None` when nothing
/// but mentions and blanks remain.
pub fn parse_command(text: &str, prefix: Option<&str>, bot_id: u64) -> Option<ParsedCommand> {
    let text = match prefix {
        Some(prefix) if !prefix.is_empty() => text.strip_prefix(prefix).unwrap_or(text),
        _ => text,
    };

    let mut raw = Vec::new();
    let mut cleaned = Vec::new();
    for token in text.split(' ') {
        if let Some(mention) = parse_mention(token) {
            if mention != Mention::User(bot_id) {
                raw.push(token.to_string());
            }
            continue;
        }
        if !token.is_empty() {
            raw.push(token.to_string());
            cleaned.push(token.to_string());
        }
    }

    if cleaned.is_empty() {
        return None;
    }
    let name = cleaned.remove(0).to_lowercase();
    // The command word is the first raw token that is not a mention.
    if let Some(pos) = raw.iter().position(|t| parse_mention(t).is_none()) {
        raw.remove(pos);
    }

    Some(ParsedCommand {
        name,
        raw_arguments: raw,
        cleaned_arguments: cleaned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: u64 = 12345;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_mention_forms() {
        assert_eq!(parse_mention("<@12345>"), Some(Mention::User(12345)));
        assert_eq!(parse_mention("<@!12345>"), Some(Mention::User(12345)));
        assert_eq!(parse_mention("<@&777>"), Some(Mention::Role(777)));
        assert_eq!(parse_mention("<@>"), None);
        assert_eq!(parse_mention("<@!>"), None);
        assert_eq!(parse_mention("<@12a45>"), None);
        assert_eq!(parse_mention("<@12345>,"), None);
        assert_eq!(parse_mention("@12345"), None);
        assert_eq!(parse_mention("<@99999999999999999999999>"), None);
    }

    #[test]
    fn test_prefix_command_without_arguments() {
        let parsed = parse_command("!ping", Some("!"), BOT).unwrap();
        assert_eq!(parsed.name, "ping");
        assert!(parsed.raw_arguments.is_empty());
        assert!(parsed.cleaned_arguments.is_empty());
    }

    #[test]
    fn test_prefix_is_stripped_once() {
        let parsed = parse_command("!!ping", Some("!"), BOT).unwrap();
        assert_eq!(parsed.name, "!ping");
    }

    #[test]
    fn test_self_mention_invocation() {
        let parsed = parse_command("<@12345> ping foo", Some("!"), BOT).unwrap();
        assert_eq!(parsed.name, "ping");
        assert_eq!(parsed.raw_arguments, strings(&["foo"]));
        assert_eq!(parsed.cleaned_arguments, strings(&["foo"]));
    }

    #[test]
    fn test_nickname_self_mention_is_dropped() {
        let parsed = parse_command("<@!12345> PING", None, BOT).unwrap();
        assert_eq!(parsed.name, "ping");
        assert!(parsed.raw_arguments.is_empty());
    }

    #[test]
    fn test_only_self_mention_is_noise() {
        assert_eq!(parse_command("<@12345>", Some("!"), BOT), None);
        assert_eq!(parse_command("<@12345>   ", Some("!"), BOT), None);
        assert_eq!(parse_command("", Some("!"), BOT), None);
        assert_eq!(parse_command("!", Some("!"), BOT), None);
    }

    #[test]
    fn test_other_mentions_kept_in_raw_only() {
        let parsed = parse_command("!slap <@999> hard", Some("!"), BOT).unwrap();
        assert_eq!(parsed.name, "slap");
        assert_eq!(parsed.raw_arguments, strings(&["<@999>", "hard"]));
        assert_eq!(parsed.cleaned_arguments, strings(&["hard"]));
    }

    #[test]
    fn test_mention_before_command_word_stays_in_raw() {
        let parsed = parse_command("<@12345> <@999> hug", None, BOT).unwrap();
        assert_eq!(parsed.name, "hug");
        assert_eq!(parsed.raw_arguments, strings(&["<@999>"]));
        assert!(parsed.cleaned_arguments.is_empty());
    }

    #[test]
    fn test_repeated_spaces_are_filtered() {
        let parsed = parse_command("!echo  a   b ", Some("!"), BOT).unwrap();
        assert_eq!(parsed.name, "echo");
        assert_eq!(parsed.cleaned_arguments, strings(&["a", "b"]));
        assert_eq!(parsed.raw_arguments, strings(&["a", "b"]));
    }

    #[test]
    fn test_no_prefix_configured() {
        let parsed = parse_command("!ping", None, BOT).unwrap();
        assert_eq!(parsed.name, "!ping");
    }

    #[test]
    fn test_mentions_user() {
        assert!(mentions_user("hey <@12345> ping", BOT));
        assert!(mentions_user("<@!12345> ping", BOT));
        assert!(!mentions_user("hey <@999> ping", BOT));
        assert!(!mentions_user("<@&12345> roles are not users", BOT));
        assert_eq!(self_mention(BOT), "<@12345>");
    }

    #[test]
    fn test_mention_detection_agrees_with_tokenizer() {
        // A newline glues the mention to the next word, so neither side sees a mention.
        let text = "<@12345>\nping";
        assert!(!mentions_user(text, BOT));
        let parsed = parse_command(text, Some("!"), BOT).unwrap();
        assert!(parse_mention(&parsed.name).is_none());

        for text in ["<@12345> ping", "hi <@!12345>", "<@12345>"] {
            let was_mention = mentions_user(text, BOT);
            let dropped = parse_command(text, None, BOT)
                .map_or(true, |p| !p.raw_arguments.iter().any(|t| t.contains("12345")));
            assert!(was_mention && dropped, "{}", text);
        }
    }
}
