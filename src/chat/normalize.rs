use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::types::Message;

/// Reply chains deeper than this are cut off when looking for a thread root.
const MAX_REPLY_DEPTH: usize = 64;

/// A chat event as read from the platform, before normalization.
#[derive(Debug, Clone)]
pub struct RawChatEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub conversation_id: String,
    pub conversation_name: String,
    /// Id of the message this one replies to.
    pub reply_to: Option<String>,
}

/// Turn raw events into chronologically sorted `Message`s.
///
/// Reply chains collapse to their root: every reply's `thread_id` is the id of
/// the oldest message reachable through `reply_to` links that we actually have.
/// An emoji-only reply is a structural reaction to the message it replies to.
pub fn normalize_events(mut events: Vec<RawChatEvent>) -> Vec<Message> {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    events.dedup_by(|a, b| a.id == b.id);

    let parents: HashMap<&str, Option<&str>> = events
        .iter()
        .map(|e| (e.id.as_str(), e.reply_to.as_deref()))
        .collect();

    events
        .iter()
        .map(|e| {
            let thread_id = e
                .reply_to
                .as_deref()
                .map(|parent| thread_root(parent, &parents).to_string());
            let is_reaction = e.reply_to.is_some() && is_emoji_only(&e.content);

            Message {
                id: e.id.clone(),
                created_at: e.timestamp,
                content: e.content.clone(),
                author: e.author.clone(),
                conversation_id: e.conversation_id.clone(),
                conversation_name: e.conversation_name.clone(),
                thread_id,
                is_reaction,
                reacted_to_id: if is_reaction { e.reply_to.clone() } else { None },
            }
        })
        .collect()
}

fn thread_root<'a>(start: &'a str, parents: &HashMap<&'a str, Option<&'a str>>) -> &'a str {
    let mut current = start;
    for _ in 0..MAX_REPLY_DEPTH {
        match parents.get(current) {
            Some(Some(parent)) => current = parent,
            _ => break,
        }
    }
    current
}

/// True for content made only of emoji / pictographs or Discord custom emoji tags.
fn is_emoji_only(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed == "+1" {
        return true;
    }
    trimmed.split_whitespace().all(|token| {
        let custom = token.starts_with('<') && token.ends_with('>') && token.contains(':');
        custom || token.chars().all(|c| !c.is_ascii() && !c.is_alphanumeric())
    })
}
