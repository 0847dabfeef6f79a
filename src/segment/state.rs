use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chat::types::truncate_chars;
use crate::chat::Message;

const SEED_SUMMARY_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    Open,
    Resolved,
    /// Only ever derived at export time from idle age.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Initiates,
    Develops,
    Responds,
    Resolves,
    Reacts,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiates => "INITIATES",
            Role::Develops => "DEVELOPS",
            Role::Responds => "RESPONDS",
            Role::Resolves => "RESOLVES",
            Role::Reacts => "REACTS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Structural,
    Oracle,
}

/// An open-ended topical cluster inside one conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    /// Short name used in prompts, `S1`, `S2`, ...
    pub label: String,
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    pub status: SegmentStatus,
    pub summary: String,
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Segment {
    pub fn contains(&self, message_id: &str) -> bool {
        self.message_ids.iter().any(|id| id == message_id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn idle_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity_at).num_minutes()
    }

    /// Idle strictly longer than `threshold_minutes`, measured to the second.
    pub fn idle_longer_than(&self, now: DateTime<Utc>, threshold_minutes: i64) -> bool {
        (now - self.last_activity_at).num_seconds() > threshold_minutes.saturating_mul(60)
    }
}

/// One per processed message. Refers to its segment by id only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub message_id: String,
    pub conversation_id: String,
    pub attaches_to: Option<String>,
    pub segment_id: String,
    pub role: Role,
    pub confidence: f64,
    pub method: Method,
    pub reasoning: String,
    pub annotated_at: DateTime<Utc>,
}

/// Segments and annotations of one conversation, mutated message by message.
///
/// Segments are addressed by position in `active_segments`; they are never
/// removed during a run, so positions stay valid.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub conversation_id: String,
    pub active_segments: Vec<Segment>,
    /// Every message processed so far, in processing order.
    history: Vec<Message>,
    message_pos: HashMap<String, usize>,
    segment_of: HashMap<String, usize>,
    annotations: Vec<Annotation>,
    annotation_pos: HashMap<String, usize>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            active_segments: Vec::new(),
            history: Vec::new(),
            message_pos: HashMap::new(),
            segment_of: HashMap::new(),
            annotations: Vec::new(),
            annotation_pos: HashMap::new(),
        }
    }

    /// Start a segment seeded from `message`. The message itself is added by `attach`.
    pub fn open_segment(&mut self, message: &Message) -> usize {
        let ordinal = self.active_segments.len() + 1;
        self.active_segments.push(Segment {
            id: format!("{}/S{}", self.conversation_id, ordinal),
            label: format!("S{}", ordinal),
            conversation_id: self.conversation_id.clone(),
            message_ids: Vec::new(),
            status: SegmentStatus::Open,
            summary: truncate_chars(&message.content, SEED_SUMMARY_CHARS),
            participants: Vec::new(),
            created_at: message.created_at,
            last_activity_at: message.created_at,
            messages: Vec::new(),
        });
        self.active_segments.len() - 1
    }

    /// Add `message` to a segment. Adding the same message twice changes nothing.
    pub fn attach(&mut self, segment: usize, message: &Message) {
        if !self.message_pos.contains_key(&message.id) {
            self.message_pos.insert(message.id.clone(), self.history.len());
            self.history.push(message.clone());
        }

        let seg = &mut self.active_segments[segment];
        if seg.contains(&message.id) {
            return;
        }
        seg.message_ids.push(message.id.clone());
        seg.messages.push(message.clone());
        if message.created_at > seg.last_activity_at {
            seg.last_activity_at = message.created_at;
        }
        if !seg.participants.contains(&message.author) {
            seg.participants.push(message.author.clone());
        }
        self.segment_of.entry(message.id.clone()).or_insert(segment);
    }

    pub fn record(&mut self, annotation: Annotation) {
        if self.annotation_pos.contains_key(&annotation.message_id) {
            return;
        }
        if annotation.role == Role::Resolves {
            if let Some(&seg) = self.segment_of.get(&annotation.message_id) {
                self.active_segments[seg].status = SegmentStatus::Resolved;
            }
        }
        self.annotation_pos
            .insert(annotation.message_id.clone(), self.annotations.len());
        self.annotations.push(annotation);
    }

    pub fn is_annotated(&self, message_id: &str) -> bool {
        self.annotation_pos.contains_key(message_id)
    }

    pub fn annotation(&self, message_id: &str) -> Option<&Annotation> {
        self.annotation_pos
            .get(message_id)
            .map(|&i| &self.annotations[i])
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn segment_of(&self, message_id: &str) -> Option<usize> {
        self.segment_of.get(message_id).copied()
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.message_pos.get(message_id).map(|&i| &self.history[i])
    }

    /// The last `window` processed messages, oldest first.
    pub fn recent(&self, window: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    /// Look a segment up by full id, label, or bare ordinal; case-insensitive.
    pub fn find_segment(&self, name: &str) -> Option<usize> {
        let name = name.trim().trim_matches(|c| c == '"' || c == '[' || c == ']');
        if name.is_empty() {
            return None;
        }
        let label = if name.chars().all(|c| c.is_ascii_digit()) {
            format!("S{}", name)
        } else {
            name.to_string()
        };
        self.active_segments.iter().position(|s| {
            s.id.eq_ignore_ascii_case(name) || s.label.eq_ignore_ascii_case(&label)
        })
    }

    /// The most recently created segment.
    pub fn most_recent_segment(&self) -> Option<usize> {
        self.active_segments.len().checked_sub(1)
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::fixtures::msg;

    fn annotation(message_id: &str, segment: &Segment, role: Role) -> Annotation {
        Annotation {
            message_id: message_id.to_string(),
            conversation_id: "general".to_string(),
            attaches_to: None,
            segment_id: segment.id.clone(),
            role,
            confidence: 1.0,
            method: Method::Oracle,
            reasoning: String::new(),
            annotated_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_and_attach() {
        let mut state = ConversationState::new("general");
        let first = msg("a", 0, "alice", "release notes draft is up");
        let seg = state.open_segment(&first);
        state.attach(seg, &first);
        state.attach(seg, &msg("b", 120, "bob", "looks good"));

        let segment = &state.active_segments[seg];
        assert_eq!(segment.id, "general/S1");
        assert_eq!(segment.label, "S1");
        assert_eq!(segment.message_ids, vec!["a", "b"]);
        assert_eq!(segment.participants, vec!["alice", "bob"]);
        assert_eq!(segment.last_activity_at, msg("b", 120, "bob", "").created_at);
        assert_eq!(segment.summary, "release notes draft is up");
        assert_eq!(state.segment_of("b"), Some(seg));
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut state = ConversationState::new("general");
        let m = msg("a", 0, "alice", "hi");
        let seg = state.open_segment(&m);
        state.attach(seg, &m);
        state.attach(seg, &m);
        assert_eq!(state.active_segments[seg].message_ids.len(), 1);
        assert_eq!(state.message_count(), 1);
    }

    #[test]
    fn test_resolves_marks_segment() {
        let mut state = ConversationState::new("general");
        let m = msg("a", 0, "alice", "fixed, closing");
        let seg = state.open_segment(&m);
        state.attach(seg, &m);
        let ann = annotation("a", &state.active_segments[seg], Role::Resolves);
        state.record(ann.clone());
        state.record(ann);

        assert_eq!(state.active_segments[seg].status, SegmentStatus::Resolved);
        assert_eq!(state.annotations().len(), 1);
        assert!(state.is_annotated("a"));
    }

    #[test]
    fn test_find_segment_names() {
        let mut state = ConversationState::new("general");
        for i in 0..3 {
            let m = msg(&format!("m{}", i), i * 60, "alice", "x");
            let seg = state.open_segment(&m);
            state.attach(seg, &m);
        }
        assert_eq!(state.find_segment("S2"), Some(1));
        assert_eq!(state.find_segment("s3"), Some(2));
        assert_eq!(state.find_segment("general/S1"), Some(0));
        assert_eq!(state.find_segment("2"), Some(1));
        assert_eq!(state.find_segment("[S1]"), Some(0));
        assert_eq!(state.find_segment("S9"), None);
        assert_eq!(state.find_segment(""), None);
        assert_eq!(state.most_recent_segment(), Some(2));
    }

    #[test]
    fn test_recent_window() {
        let mut state = ConversationState::new("general");
        let m = msg("m0", 0, "alice", "x");
        let seg = state.open_segment(&m);
        for i in 0..5 {
            state.attach(seg, &msg(&format!("m{}", i), i * 60, "alice", "x"));
        }
        let ids: Vec<&str> = state.recent(2).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
        assert_eq!(state.recent(50).len(), 5);
        assert_eq!(state.message("m2").map(|m| m.id.as_str()), Some("m2"));
    }
}
