use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized chat message. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub author: String,
    pub conversation_id: String,
    pub conversation_name: String,
    /// Id of the thread-root message, if this message is part of a thread.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Structural reaction to another message (emoji reply and friends).
    #[serde(default)]
    pub is_reaction: bool,
    #[serde(default)]
    pub reacted_to_id: Option<String>,
}

impl Message {
    /// Minutes elapsed between `earlier` and this message. Negative if `earlier` is later.
    pub fn minutes_since(&self, earlier: &Message) -> f64 {
        (self.created_at - earlier.created_at).num_milliseconds() as f64 / 60_000.0
    }

    /// Content truncated to `max` characters, for prompts and summaries.
    pub fn snippet(&self, max: usize) -> String {
        truncate_chars(self.content.trim(), max)
    }
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

/// Hand-built messages for unit tests across the crate.
#[cfg(test)]
pub mod fixtures {
    use chrono::{Duration, TimeZone, Utc};

    use super::Message;

    pub fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    /// Message in `#general` posted `seconds` after the fixture epoch.
    pub fn msg(id: &str, seconds: i64, author: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            created_at: at(seconds),
            content: content.to_string(),
            author: author.to_string(),
            conversation_id: "general".to_string(),
            conversation_name: "general".to_string(),
            thread_id: None,
            is_reaction: false,
            reacted_to_id: None,
        }
    }

    pub fn in_conversation(mut m: Message, conversation: &str) -> Message {
        m.conversation_id = conversation.to_string();
        m.conversation_name = conversation.to_string();
        m
    }

    pub fn in_thread(mut m: Message, root: &str) -> Message {
        m.thread_id = Some(root.to_string());
        m
    }

    pub fn reaction(mut m: Message, target: &str) -> Message {
        m.is_reaction = true;
        m.reacted_to_id = Some(target.to_string());
        m
    }
}
