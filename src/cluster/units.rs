use std::collections::HashSet;

use tracing::debug;

use super::types::Unit;
use crate::chat::Message;

const SAME_AUTHOR_WINDOW_MINUTES: f64 = 2.0;
const ANY_AUTHOR_WINDOW_MINUTES: f64 = 1.0;
const CONTINUATION_WINDOW_MINUTES: f64 = 3.0;
const REPLY_WINDOW_MINUTES: f64 = 24.0 * 60.0;

/// Closed units searched for a thread match before opening a new unit.
const REOPEN_LOOKBACK: usize = 5;

/// Anything this short reads as a continuation.
const CONTINUATION_MAX_CHARS: usize = 10;

/// Short acknowledgments that continue whatever came before.
const CONTINUATION_TOKENS: &[&str] = &[
    "yeah", "yea", "ya", "yes", "yep", "yup", "no", "nah", "nope", "ok", "okay", "k", "kk",
    "lol", "lmao", "rofl", "haha", "hah", "+1", "-1", "same", "this", "^", "^^", "ty", "thx",
    "thanks", "thank you", "np", "nice", "cool", "true", "agreed", "exactly", "right", "ikr",
    "fr", "oh", "ah", "hmm", "wow", "sure", "got it", "makes sense", "fair",
];

/// Openers that mark a message as answering the one before it.
const REPLY_PHRASES: &[&str] = &[
    "yes", "no", "yeah", "yep", "nope", "sure", "ok", "okay", "agreed", "exactly", "right",
    "true", "correct", "thanks", "thank you", "good point", "fair", "fair enough", "i agree",
    "i think", "makes sense", "same here", "me too", "not really", "definitely", "absolutely",
    "actually", "also", "and", "but", "well", "so", "oh", "ah", "hmm", "wait", "what about",
];

const REFERENCE_WORDS: &[&str] = &["this", "that", "same"];

/// Group chronologically sorted messages into atomic units.
///
/// A single pass with one open unit. A message joins the open unit when a
/// thread, timing, continuation or reply rule matches. Otherwise it may rejoin
/// one of the last few closed units that holds its thread, so an interrupted
/// thread stays in one unit; failing that, the open unit closes.
pub fn build_units(messages: &[Message]) -> Vec<Unit> {
    let mut sorted = messages.to_vec();
    sorted.sort_by_key(|m| m.created_at);

    let mut closed: Vec<Vec<Message>> = Vec::new();
    let mut current: Vec<Message> = Vec::new();

    for message in &sorted {
        if current.is_empty() {
            current.push(message.clone());
            continue;
        }

        if extends_unit(&current, message) || holds_thread_root(&current, message) {
            current.push(message.clone());
            continue;
        }

        if let Some(pos) = reopen_target(&closed, message) {
            debug!(
                message_id = %message.id,
                unit = pos,
                "thread reply rejoins closed unit"
            );
            closed[pos].push(message.clone());
            continue;
        }

        closed.push(std::mem::replace(&mut current, vec![message.clone()]));
    }

    if !current.is_empty() {
        closed.push(current);
    }

    closed
        .into_iter()
        .enumerate()
        .map(|(index, messages)| Unit::from_messages(index, messages))
        .collect()
}

/// Rules in priority order; the first match extends the open unit.
///
/// "Previous" is the open unit's last message, not the chronological
/// predecessor, which may have rejoined a closed unit.
fn extends_unit(current: &[Message], message: &Message) -> bool {
    let first = &current[0];
    let last = &current[current.len() - 1];
    let since_last = message.minutes_since(last);
    let since_first = message.minutes_since(first);
    let same_conversation = message.conversation_id == last.conversation_id;

    // Thread match, no time limit
    if let Some(thread) = message.thread_id.as_deref() {
        if last.thread_id.as_deref() == Some(thread)
            || current.iter().any(|m| m.thread_id.as_deref() == Some(thread))
        {
            return true;
        }
    }

    if !same_conversation {
        return false;
    }

    // Temporal proximity
    if (message.author == last.author && since_last < SAME_AUTHOR_WINDOW_MINUTES)
        || since_last < ANY_AUTHOR_WINDOW_MINUTES
    {
        return true;
    }

    if is_continuation(&message.content) && since_last < CONTINUATION_WINDOW_MINUTES {
        return true;
    }

    (is_reply_like(message, last) && since_last < REPLY_WINDOW_MINUTES)
        || (is_reply_like(message, first) && since_first < REPLY_WINDOW_MINUTES)
}

/// The message replies into a thread whose root sits in the open unit.
fn holds_thread_root(current: &[Message], message: &Message) -> bool {
    match message.thread_id.as_deref() {
        Some(thread) => current.iter().any(|m| m.id == thread),
        None => false,
    }
}

/// Most recent of the last few closed units that contains the message's thread.
fn reopen_target(closed: &[Vec<Message>], message: &Message) -> Option<usize> {
    let thread = message.thread_id.as_deref()?;
    closed
        .iter()
        .enumerate()
        .rev()
        .take(REOPEN_LOOKBACK)
        .find(|(_, unit)| {
            unit.iter()
                .any(|m| m.id == thread || m.thread_id.as_deref() == Some(thread))
        })
        .map(|(pos, _)| pos)
}

pub fn is_continuation(content: &str) -> bool {
    let text = content.trim().to_lowercase();
    text.chars().count() <= CONTINUATION_MAX_CHARS || CONTINUATION_TOKENS.contains(&text.as_str())
}

/// Heuristic: does `message` read like an answer to `prior`?
pub fn is_reply_like(message: &Message, prior: &Message) -> bool {
    let text = message.content.trim().to_lowercase();
    let prior_text = prior.content.trim().to_lowercase();
    let len = text.chars().count();
    let prior_len = prior_text.chars().count();

    if REPLY_PHRASES.iter().any(|p| starts_with_phrase(&text, p)) {
        return true;
    }

    if words(&text).any(|w| REFERENCE_WORDS.contains(&w)) {
        return true;
    }

    if prior_len > 0 && (len as f64) < prior_len as f64 * 0.3 {
        return true;
    }

    if len + prior_len <= 50 && shares_keyword(&text, &prior_text) {
        return true;
    }

    // Short elaboration on a substantial message
    len <= 30 && prior_len > 20 && (len as f64) < prior_len as f64 * 0.5
}

/// `text` is `phrase` or begins with it followed by a non-word character.
fn starts_with_phrase(text: &str, phrase: &str) -> bool {
    match text.strip_prefix(phrase) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric()),
        None => false,
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
}

/// Case-insensitive words of 3+ chars in common, at least one of them 4+ chars.
fn shares_keyword(a: &str, b: &str) -> bool {
    let left: HashSet<&str> = words(a).filter(|w| w.chars().count() >= 3).collect();
    words(b)
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| left.contains(w))
        .any(|w| w.chars().count() >= 4)
}
