//! The direct commands the bot answers without the completion provider.

use crate::history::strip_mentions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `health` or `<prefix>health`
    Health,
    /// `<prefix>check [identifier]`
    Check(Option<String>),
    /// Anything else, with mention tokens removed.
    Ask(String),
}

/// Classify mention text. Mention tokens are stripped first, so
/// `<@123> /check x` is a check command.
pub fn parse_command<S: AsRef<str>>(text: &str, prefixes: &[S]) -> Command {
    let clean = strip_mentions(text);
    let mut words = clean.split_whitespace();
    let Some(first) = words.next() else {
        return Command::Ask(clean);
    };
    let first = first.to_lowercase();

    let bare = prefixes
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .find_map(|p| first.strip_prefix(p));

    match bare {
        Some("health") => Command::Health,
        Some("check") => Command::Check(words.next().map(str::to_string)),
        _ if first == "health" && words.next().is_none() => Command::Health,
        _ => Command::Ask(clean),
    }
}

/// True when `text` is a direct command (`health`, `<prefix>health`,
/// `<prefix>check ...`). Such messages are bot invocations, not conversation.
pub fn is_command<S: AsRef<str>>(text: &str, prefixes: &[S]) -> bool {
    matches!(
        parse_command(text, prefixes),
        Command::Health | Command::Check(_)
    )
}
