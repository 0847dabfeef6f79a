//! Pipeline B: a per-conversation segment state machine fed one message at a time.

pub mod prompts;
pub mod state;
pub mod verdict;

pub use state::{Annotation, ConversationState, Method, Role, Segment, SegmentStatus};
pub use verdict::{Choice, Verdict};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chat::Message;
use crate::config::{PipelineConfig, SegmentConfig};
use crate::oracle::{self, Oracle, OracleError, OracleFailure, Pacer};

/// Confidence multiplier when a named segment is unknown and the message falls back to the newest one.
const FALLBACK_PENALTY: f64 = 0.7;
/// Confidence multiplier when a named segment is unknown and a new segment is opened instead.
const NEW_SEGMENT_PENALTY: f64 = 0.5;

/// The earlier message a new one is most likely tied to.
#[derive(Debug, Clone)]
pub struct Reference {
    pub message: Message,
    pub segment: usize,
    /// Found through the thread root rather than adjacency.
    pub via_thread: bool,
}

pub struct SegmentationReport {
    pub conversations: Vec<ConversationState>,
    pub failures: Vec<OracleFailure>,
    pub oracle_calls: usize,
}

pub struct Segmenter<'a> {
    oracle: &'a dyn Oracle,
    config: &'a SegmentConfig,
}

impl<'a> Segmenter<'a> {
    pub fn new(oracle: &'a dyn Oracle, config: &'a SegmentConfig) -> Self {
        Self { oracle, config }
    }

    /// Segment a message set. Conversations come out in order of first appearance.
    pub async fn run(&self, messages: &[Message], pacer: &mut Pacer) -> SegmentationReport {
        let mut sorted = messages.to_vec();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let calls_before = pacer.calls();
        let mut conversations: Vec<ConversationState> = Vec::new();
        let mut failures = Vec::new();

        for message in &sorted {
            let pos = match conversations
                .iter()
                .position(|c| c.conversation_id == message.conversation_id)
            {
                Some(pos) => pos,
                None => {
                    conversations.push(ConversationState::new(message.conversation_id.clone()));
                    conversations.len() - 1
                }
            };
            if let Some(failure) = self.step(&mut conversations[pos], message, pacer).await {
                failures.push(failure);
            }
        }

        let oracle_calls = pacer.calls() - calls_before;
        info!(
            messages = sorted.len(),
            conversations = conversations.len(),
            segments = conversations.iter().map(|c| c.active_segments.len()).sum::<usize>(),
            oracle_calls,
            failures = failures.len(),
            "segmentation complete"
        );

        SegmentationReport {
            conversations,
            failures,
            oracle_calls,
        }
    }

    /// Process one message. Returns the oracle failure it degraded from, if any.
    ///
    /// A message that was already annotated is left alone.
    pub async fn step(
        &self,
        state: &mut ConversationState,
        message: &Message,
        pacer: &mut Pacer,
    ) -> Option<OracleFailure> {
        if state.is_annotated(&message.id) {
            debug!(message_id = %message.id, "already annotated, skipping");
            return None;
        }

        if let Some(target) = message.reacted_to_id.as_deref().filter(|_| message.is_reaction) {
            attach_reaction(state, message, target);
            return None;
        }

        let reference = find_reference(state, message, self.config.recent_window);
        let (system, prompt) = prompts::build(state, message, reference.as_ref(), self.config);
        pacer.wait().await;

        match oracle::ask::<Value>(self.oracle, &system, &prompt, self.config.budget).await {
            Ok(reply) => {
                let verdict = Verdict::from_reply(&reply);
                resolve(state, message, reference.as_ref(), verdict);
                None
            }
            Err(error) => {
                warn!(message_id = %message.id, %error, "segment classification failed, opening new segment");
                degrade(state, message, &error);
                Some(OracleFailure::new(
                    format!("segment classification for message {}", message.id),
                    error,
                ))
            }
        }
    }
}

/// Run pipeline B with the configured strategy.
pub async fn segment_messages(
    oracle: &dyn Oracle,
    messages: &[Message],
    config: &PipelineConfig,
) -> SegmentationReport {
    let mut pacer = Pacer::new(config.call_delay);
    Segmenter::new(oracle, &config.segments)
        .run(messages, &mut pacer)
        .await
}

/// Thread root's segment, searched over the whole conversation; otherwise the
/// closest earlier message within the recent window that has a segment.
pub fn find_reference(
    state: &ConversationState,
    message: &Message,
    window: usize,
) -> Option<Reference> {
    if let Some(root) = message.thread_id.as_deref() {
        if let (Some(segment), Some(root_message)) = (state.segment_of(root), state.message(root)) {
            return Some(Reference {
                message: root_message.clone(),
                segment,
                via_thread: true,
            });
        }
    }

    state.recent(window).iter().rev().find_map(|m| {
        state.segment_of(&m.id).map(|segment| Reference {
            message: m.clone(),
            segment,
            via_thread: false,
        })
    })
}

fn attach_reaction(state: &mut ConversationState, message: &Message, target: &str) {
    let segment = match state.segment_of(target) {
        Some(segment) => segment,
        None => {
            debug!(message_id = %message.id, target, "reaction target has no segment, opening one");
            state.open_segment(message)
        }
    };
    state.attach(segment, message);
    let annotation = Annotation {
        message_id: message.id.clone(),
        conversation_id: state.conversation_id.clone(),
        attaches_to: Some(target.to_string()),
        segment_id: state.active_segments[segment].id.clone(),
        role: Role::Reacts,
        confidence: 1.0,
        method: Method::Structural,
        reasoning: format!("reaction to {}", target),
        annotated_at: Utc::now(),
    };
    state.record(annotation);
}

/// Turn a verdict into a segment placement and annotation.
fn resolve(
    state: &mut ConversationState,
    message: &Message,
    reference: Option<&Reference>,
    verdict: Verdict,
) {
    let matched = match &verdict.choice {
        Choice::New => None,
        Choice::Continue => reference.map(|r| r.segment),
        Choice::Named(name) => state.find_segment(name),
        Choice::Missing => None,
    };

    let (segment, role, confidence) = match (&verdict.choice, matched) {
        (_, Some(segment)) => (
            segment,
            verdict.role.unwrap_or(Role::Develops),
            verdict.confidence,
        ),
        (Choice::New, None) => (
            state.open_segment(message),
            verdict.role.unwrap_or(Role::Initiates),
            verdict.confidence,
        ),
        (choice, None) => {
            let role = verdict.role.unwrap_or(Role::Develops);
            match state.most_recent_segment().filter(|_| role != Role::Initiates) {
                Some(segment) => {
                    warn!(
                        message_id = %message.id,
                        ?choice,
                        fallback = %state.active_segments[segment].label,
                        "unknown segment, attaching to newest"
                    );
                    (segment, role, verdict.confidence * FALLBACK_PENALTY)
                }
                None => {
                    warn!(message_id = %message.id, ?choice, "unknown segment, opening new");
                    (
                        state.open_segment(message),
                        Role::Initiates,
                        verdict.confidence * NEW_SEGMENT_PENALTY,
                    )
                }
            }
        }
    };

    let attaches_to = verdict
        .attaches_to
        .filter(|id| id != &message.id && state.segment_of(id).is_some())
        .or_else(|| default_attachment(state, segment, reference));

    state.attach(segment, message);
    let seg = &mut state.active_segments[segment];
    if let Some(summary) = verdict.summary {
        seg.summary = summary;
    }
    let segment_id = seg.id.clone();
    debug!(
        message_id = %message.id,
        segment = %segment_id,
        role = role.as_str(),
        confidence,
        "message classified"
    );

    state.record(Annotation {
        message_id: message.id.clone(),
        conversation_id: state.conversation_id.clone(),
        attaches_to,
        segment_id,
        role,
        confidence,
        method: Method::Oracle,
        reasoning: verdict.reasoning,
        annotated_at: Utc::now(),
    });
}

/// The reference message when it sits in the chosen segment, else that segment's latest message.
fn default_attachment(
    state: &ConversationState,
    segment: usize,
    reference: Option<&Reference>,
) -> Option<String> {
    if let Some(r) = reference.filter(|r| r.segment == segment) {
        return Some(r.message.id.clone());
    }
    state.active_segments[segment]
        .last_message()
        .map(|m| m.id.clone())
}

/// The oracle is unavailable: the message starts its own segment at zero confidence.
fn degrade(state: &mut ConversationState, message: &Message, error: &OracleError) {
    let segment = state.open_segment(message);
    state.attach(segment, message);
    let annotation = Annotation {
        message_id: message.id.clone(),
        conversation_id: state.conversation_id.clone(),
        attaches_to: None,
        segment_id: state.active_segments[segment].id.clone(),
        role: Role::Initiates,
        confidence: 0.0,
        method: Method::Oracle,
        reasoning: format!("oracle unavailable: {}", error),
        annotated_at: Utc::now(),
    };
    state.record(annotation);
}
