//! JSON documents handed to the display layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chat::Message;
use crate::cluster::Stack;
use crate::segment::{Annotation, ConversationState, Role, SegmentStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationView {
    pub speech_act: Role,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub thread_id: Option<String>,
    pub annotation: Option<AnnotationView>,
}

impl MessageView {
    fn new(message: &Message, annotation: Option<&Annotation>) -> Self {
        Self {
            id: message.id.clone(),
            author: message.author.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            thread_id: message.thread_id.clone(),
            annotation: annotation.map(|a| AnnotationView {
                speech_act: a.role,
                confidence: a.confidence,
                reasoning: a.reasoning.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackView {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub message_ids: Vec<String>,
    pub messages: Vec<MessageView>,
    pub participants: Vec<String>,
    pub status: SegmentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackDocument {
    pub stacks: Vec<StackView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentView {
    pub id: String,
    pub label: String,
    pub conversation_id: String,
    pub summary: String,
    pub message_ids: Vec<String>,
    pub messages: Vec<MessageView>,
    pub participants: Vec<String>,
    pub status: SegmentStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentDocument {
    pub segments: Vec<SegmentView>,
}

pub fn stack_document(stacks: &[Stack]) -> StackDocument {
    StackDocument {
        stacks: stacks
            .iter()
            .map(|s| StackView {
                id: s.id.clone(),
                title: s.title.clone(),
                summary: s.summary.clone(),
                message_ids: s.messages.iter().map(|m| m.id.clone()).collect(),
                messages: s.messages.iter().map(|m| MessageView::new(m, None)).collect(),
                participants: s.participants(),
                status: SegmentStatus::Open,
            })
            .collect(),
    }
}

/// Segments of every conversation. Open segments idle longer than
/// `staleness_minutes` at the time of the latest message are shown as STALE.
pub fn segment_document(conversations: &[ConversationState], staleness_minutes: i64) -> SegmentDocument {
    let latest = conversations
        .iter()
        .flat_map(|c| c.active_segments.iter().map(|s| s.last_activity_at))
        .max();

    let segments = conversations
        .iter()
        .flat_map(|state| {
            state.active_segments.iter().map(move |segment| {
                let stale = segment.status == SegmentStatus::Open
                    && latest.is_some_and(|now| segment.idle_longer_than(now, staleness_minutes));
                SegmentView {
                    id: segment.id.clone(),
                    label: segment.label.clone(),
                    conversation_id: segment.conversation_id.clone(),
                    summary: segment.summary.clone(),
                    message_ids: segment.message_ids.clone(),
                    messages: segment
                        .messages
                        .iter()
                        .map(|m| MessageView::new(m, state.annotation(&m.id)))
                        .collect(),
                    participants: segment.participants.clone(),
                    status: if stale { SegmentStatus::Stale } else { segment.status },
                    created_at: segment.created_at,
                    last_activity_at: segment.last_activity_at,
                }
            })
        })
        .collect();

    SegmentDocument { segments }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::chat::types::fixtures::{in_thread, msg};
    use crate::segment::Method;

    fn annotate(state: &mut ConversationState, segment: usize, message: &Message, role: Role) {
        state.attach(segment, message);
        state.record(Annotation {
            message_id: message.id.clone(),
            conversation_id: state.conversation_id.clone(),
            attaches_to: None,
            segment_id: state.active_segments[segment].id.clone(),
            role,
            confidence: 0.75,
            method: Method::Oracle,
            reasoning: "because".to_string(),
            annotated_at: Utc::now(),
        });
    }

    #[test]
    fn test_stack_document_shape() {
        let stack = Stack::new(
            "stack-1".into(),
            "Deploys".into(),
            "Friday deploy".into(),
            vec![msg("a", 0, "alice", "deploying"), in_thread(msg("b", 30, "bob", "ok"), "a")],
        );
        let doc = serde_json::to_value(stack_document(&[stack])).unwrap();
        let view = &doc["stacks"][0];
        assert_eq!(view["messageIds"], json!(["a", "b"]));
        assert_eq!(view["participants"], json!(["alice", "bob"]));
        assert_eq!(view["status"], "OPEN");
        assert_eq!(view["messages"][1]["threadId"], "a");
        assert!(view["messages"][0]["annotation"].is_null());
        assert!(view["messages"][0]["createdAt"].is_string());
    }

    #[test]
    fn test_segment_document_marks_stale() {
        let mut state = ConversationState::new("general");
        let old = msg("a", 0, "alice", "old topic");
        let s1 = state.open_segment(&old);
        annotate(&mut state, s1, &old, Role::Initiates);

        let closed = msg("b", 60, "bob", "closed topic");
        let s2 = state.open_segment(&closed);
        annotate(&mut state, s2, &closed, Role::Resolves);

        let fresh = msg("c", 7200, "carol", "fresh topic");
        let s3 = state.open_segment(&fresh);
        annotate(&mut state, s3, &fresh, Role::Initiates);

        let doc = serde_json::to_value(segment_document(&[state], 60)).unwrap();
        let segments = doc["segments"].as_array().unwrap();
        assert_eq!(segments[0]["status"], "STALE");
        assert_eq!(segments[1]["status"], "RESOLVED");
        assert_eq!(segments[2]["status"], "OPEN");
        assert_eq!(segments[0]["label"], "S1");
        let annotation = &segments[0]["messages"][0]["annotation"];
        assert_eq!(annotation["speechAct"], "INITIATES");
        assert_eq!(annotation["confidence"], 0.75);
        assert_eq!(annotation["reasoning"], "because");
    }
}
