use chrono::{DateTime, Utc};

use super::state::{ConversationState, Segment, SegmentStatus};
use super::Reference;
use crate::chat::Message;
use crate::config::{SegmentConfig, Strategy};

const MESSAGE_CHARS: usize = 280;

const ROLES: &str = r#"Also classify what the new message does in its segment:
- INITIATES: opens a new topic or question
- DEVELOPS: adds detail, follow-up or discussion to the topic
- RESPONDS: answers a question or request in the topic
- RESOLVES: closes the topic (fix confirmed, decision made, thanks-and-done)
- REACTS: a bare acknowledgement or emoji-like reaction"#;

pub const SEGMENT_CENTRIC_SYSTEM: &str = r#"You track the parallel topics ("segments") of a group chat. Given the open segments and one new message, decide which segment the message belongs to, or NEW if it starts a topic none of them covers.

Reply with JSON only:
{"segment": "S2", "attachesTo": "<message id it replies to or null>", "role": "RESPONDS", "confidence": 0.8, "reasoning": "...", "summary": "<updated one-line topic summary>"}"#;

pub const PREVIOUS_CENTRIC_SYSTEM: &str = r#"You track topics in a group chat. Given the recent history of one topic and a new message, decide whether the new message continues that topic or starts a new one. A message posted as a reply in a thread almost always continues the thread's topic.

Reply with JSON only:
{"continues": true, "attachesTo": "<message id it replies to or null>", "role": "DEVELOPS", "confidence": 0.8, "reasoning": "...", "summary": "<updated one-line topic summary>"}"#;

pub const HYBRID_SYSTEM: &str = r#"You track the parallel topics ("segments") of a group chat. Consecutive messages usually continue the same topic, so weigh the immediately previous message heavily, but people do switch topics or pick up older ones. Decide which listed segment the new message belongs to, or NEW.

Reply with JSON only:
{"segment": "S2", "attachesTo": "<message id it replies to or null>", "role": "DEVELOPS", "confidence": 0.8, "reasoning": "...", "summary": "<updated one-line topic summary>"}"#;

pub const SINGLE_PROMPT_SYSTEM: &str = r#"You track the parallel topics of a group chat. Each line of the transcript is tagged with the segment it belongs to, like [S1]. Decide which tag the new message belongs under, or NEW if it starts a new topic.

Reply with JSON only:
{"segment": "S1", "attachesTo": "<message id it replies to or null>", "role": "RESPONDS", "confidence": 0.8, "reasoning": "..."}"#;

/// System instruction and prompt for one message under the configured strategy.
pub fn build(
    state: &ConversationState,
    message: &Message,
    reference: Option<&Reference>,
    config: &SegmentConfig,
) -> (String, String) {
    let (system, prompt) = match config.strategy {
        Strategy::SegmentCentric => (
            SEGMENT_CENTRIC_SYSTEM,
            segment_centric(state, message, reference, config),
        ),
        Strategy::PreviousCentric => (
            PREVIOUS_CENTRIC_SYSTEM,
            previous_centric(state, message, reference, config),
        ),
        Strategy::Hybrid => (HYBRID_SYSTEM, hybrid(state, message, reference, config)),
        Strategy::SinglePrompt => (
            SINGLE_PROMPT_SYSTEM,
            single_prompt(state, message, reference, config),
        ),
    };
    (format!("{}\n\n{}", system, ROLES), prompt)
}

fn line(message: &Message) -> String {
    format!(
        "[{}] ({}) {}: {}",
        message.created_at.format("%H:%M"),
        message.id,
        message.author,
        message.snippet(MESSAGE_CHARS)
    )
}

fn describe_segment(segment: &Segment, history: usize, now: DateTime<Utc>) -> String {
    let status = match segment.status {
        SegmentStatus::Resolved => ", resolved",
        _ => "",
    };
    let mut out = format!(
        "{} ({} messages, last active {} min ago{}): {}\n",
        segment.label,
        segment.messages.len(),
        segment.idle_minutes(now).max(0),
        status,
        segment.summary
    );
    let skip = segment.messages.len().saturating_sub(history);
    let lines: Vec<String> = segment.messages[skip..]
        .iter()
        .map(|m| format!("  {}", line(m)))
        .collect();
    out.push_str(&lines.join("\n"));
    out
}

fn new_message_block(message: &Message, reference: Option<&Reference>) -> String {
    let mut out = format!("New message:\n{}", line(message));
    if let Some(r) = reference.filter(|r| r.via_thread) {
        out.push_str(&format!(
            "\n(posted as a thread reply to {} by {})",
            r.message.id, r.message.author
        ));
    }
    out
}

fn segment_centric(
    state: &ConversationState,
    message: &Message,
    reference: Option<&Reference>,
    config: &SegmentConfig,
) -> String {
    let segments = if state.active_segments.is_empty() {
        "(no segments yet)".to_string()
    } else {
        state
            .active_segments
            .iter()
            .map(|s| describe_segment(s, config.history_per_segment, message.created_at))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    format!(
        "Segments:\n\n{}\n\n{}\n\nWhich segment, or NEW?",
        segments,
        new_message_block(message, reference)
    )
}

fn previous_centric(
    state: &ConversationState,
    message: &Message,
    reference: Option<&Reference>,
    config: &SegmentConfig,
) -> String {
    let Some(reference) = reference else {
        return format!(
            "There is no earlier topic in this conversation.\n\n{}\n\nDoes it continue an earlier topic?",
            new_message_block(message, None)
        );
    };

    let segment = &state.active_segments[reference.segment];
    let in_window: Vec<&Message> = {
        let recent = state.recent(config.recent_window);
        segment
            .messages
            .iter()
            .filter(|m| reference.via_thread || recent.iter().any(|r| r.id == m.id))
            .collect()
    };
    let skip = in_window.len().saturating_sub(config.history_per_segment);
    let history: Vec<String> = in_window[skip..].iter().map(|m| format!("  {}", line(m))).collect();

    let emphasis = if reference.via_thread {
        "The new message was posted in this topic's thread. Treat that as very strong evidence that it continues the topic."
    } else {
        "The topic's last message directly precedes the new message."
    };

    format!(
        "Current topic ({}): {}\n{}\n\n{}\n\n{}\n\nDoes the new message continue this topic?",
        segment.label,
        segment.summary,
        history.join("\n"),
        emphasis,
        new_message_block(message, Some(reference))
    )
}

/// Segments worth showing: fresh ones (open or resolved) plus the reference,
/// most recently active first.
pub fn hybrid_candidates<'a>(
    state: &'a ConversationState,
    now: DateTime<Utc>,
    reference: Option<usize>,
    config: &SegmentConfig,
) -> Vec<&'a Segment> {
    let reference_id = reference.map(|i| state.active_segments[i].id.as_str());
    let is_reference = |s: &Segment| Some(s.id.as_str()) == reference_id;

    let mut shown: Vec<&Segment> = state
        .active_segments
        .iter()
        .filter(|s| {
            is_reference(*s) || !s.idle_longer_than(now, config.staleness_threshold_minutes)
        })
        .collect();
    shown.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

    let cap = config.max_segments_to_show.max(1);
    if shown.len() > cap {
        let keep_reference = shown[cap..].iter().position(|s| is_reference(*s));
        if let Some(pos) = keep_reference {
            shown.swap(cap - 1, cap + pos);
        }
        shown.truncate(cap);
    }
    shown
}

fn hybrid(
    state: &ConversationState,
    message: &Message,
    reference: Option<&Reference>,
    config: &SegmentConfig,
) -> String {
    let candidates = hybrid_candidates(
        state,
        message.created_at,
        reference.map(|r| r.segment),
        config,
    );
    let segments = if candidates.is_empty() {
        "(no recent segments)".to_string()
    } else {
        candidates
            .iter()
            .map(|s| describe_segment(s, config.history_per_segment, message.created_at))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let mut out = format!("Recent segments:\n\n{}\n\n", segments);
    if let Some(r) = reference.filter(|_| config.prefer_previous_message) {
        let label = &state.active_segments[r.segment].label;
        if r.via_thread {
            out.push_str(&format!(
                "The new message is a thread reply to {} in {}. Strongly prefer {}.\n\n",
                r.message.id, label, label
            ));
        } else {
            out.push_str(&format!(
                "Previous message (in {}):\n{}\nPrefer {} unless the new message clearly changes topic.\n\n",
                label,
                line(&r.message),
                label
            ));
        }
    }
    out.push_str(&new_message_block(message, reference));
    out.push_str("\n\nWhich segment, or NEW?");
    out
}

fn single_prompt(
    state: &ConversationState,
    message: &Message,
    reference: Option<&Reference>,
    config: &SegmentConfig,
) -> String {
    let transcript: Vec<String> = state
        .recent(config.recent_window)
        .iter()
        .map(|m| {
            let tag = state
                .segment_of(&m.id)
                .map(|i| state.active_segments[i].label.as_str())
                .unwrap_or("?");
            format!("[{}] {}", tag, line(m))
        })
        .collect();
    let transcript = if transcript.is_empty() {
        "(empty)".to_string()
    } else {
        transcript.join("\n")
    };
    format!(
        "Transcript:\n{}\n\n{}\n\nWhich tag, or NEW?",
        transcript,
        new_message_block(message, reference)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::fixtures::msg;

    fn state_with(segments: &[(&str, i64)]) -> ConversationState {
        let mut state = ConversationState::new("general");
        for (id, at) in segments {
            let m = msg(id, *at, "alice", &format!("topic {}", id));
            let seg = state.open_segment(&m);
            state.attach(seg, &m);
        }
        state
    }

    #[test]
    fn test_hybrid_drops_stale_but_keeps_reference() {
        // S1 at 0s, S2 at 1h, S3 at 2h55; new message at 3h
        let state = state_with(&[("a", 0), ("b", 3600), ("c", 10500)]);
        let now = msg("x", 10800, "bob", "").created_at;
        let config = SegmentConfig::default();

        let shown: Vec<&str> = hybrid_candidates(&state, now, None, &config)
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(shown, vec!["S3"]);

        let shown: Vec<&str> = hybrid_candidates(&state, now, Some(0), &config)
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(shown, vec!["S3", "S1"]);
    }

    #[test]
    fn test_hybrid_keeps_recently_resolved_segment() {
        let mut state = state_with(&[("a", 0), ("b", 60)]);
        state.active_segments[0].status = SegmentStatus::Resolved;
        let now = msg("x", 120, "bob", "").created_at;

        let shown: Vec<&str> = hybrid_candidates(&state, now, Some(1), &SegmentConfig::default())
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(shown, vec!["S2", "S1"]);

        let (_, prompt) = build(
            &state,
            &msg("x", 120, "bob", "reopening this one"),
            None,
            &SegmentConfig::default(),
        );
        assert!(prompt.contains("S1 (1 messages, last active 2 min ago, resolved)"));
    }

    #[test]
    fn test_hybrid_staleness_counts_seconds() {
        let state = state_with(&[("a", 0)]);
        let config = SegmentConfig::default();
        let just_past = msg("x", 60 * 60 + 59, "bob", "").created_at;
        assert!(hybrid_candidates(&state, just_past, None, &config).is_empty());

        let at_limit = msg("x", 60 * 60, "bob", "").created_at;
        assert_eq!(hybrid_candidates(&state, at_limit, None, &config).len(), 1);
    }

    #[test]
    fn test_hybrid_cap_keeps_reference() {
        let state = state_with(&[("a", 0), ("b", 60), ("c", 120), ("d", 180)]);
        let now = msg("x", 240, "bob", "").created_at;
        let config = SegmentConfig {
            max_segments_to_show: 2,
            ..SegmentConfig::default()
        };
        let shown: Vec<&str> = hybrid_candidates(&state, now, Some(0), &config)
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(shown, vec!["S4", "S1"]);
    }

    #[test]
    fn test_segment_centric_lists_every_segment() {
        let state = state_with(&[("a", 0), ("b", 7200)]);
        let config = SegmentConfig {
            strategy: Strategy::SegmentCentric,
            ..SegmentConfig::default()
        };
        let (system, prompt) = build(&state, &msg("x", 9000, "bob", "any update?"), None, &config);
        assert!(system.starts_with(SEGMENT_CENTRIC_SYSTEM));
        assert!(system.contains("RESOLVES"));
        assert!(prompt.contains("S1 ("));
        assert!(prompt.contains("S2 ("));
        assert!(prompt.contains("(x) bob: any update?"));
    }

    #[test]
    fn test_previous_centric_thread_emphasis() {
        let state = state_with(&[("a", 0)]);
        let reference = Reference {
            message: msg("a", 0, "alice", "topic a"),
            segment: 0,
            via_thread: true,
        };
        let config = SegmentConfig {
            strategy: Strategy::PreviousCentric,
            ..SegmentConfig::default()
        };
        let (_, prompt) = build(&state, &msg("x", 60, "bob", "same here"), Some(&reference), &config);
        assert!(prompt.contains("Current topic (S1)"));
        assert!(prompt.contains("very strong evidence"));
        assert!(prompt.contains("thread reply to a by alice"));
    }

    #[test]
    fn test_single_prompt_tags_transcript() {
        let state = state_with(&[("a", 0), ("b", 60)]);
        let config = SegmentConfig {
            strategy: Strategy::SinglePrompt,
            ..SegmentConfig::default()
        };
        let (_, prompt) = build(&state, &msg("x", 120, "bob", "hm"), None, &config);
        assert!(prompt.contains("[S1] [09:00] (a) alice: topic a"));
        assert!(prompt.contains("[S2] [09:01] (b) alice: topic b"));
    }
}
