use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chat::Message;

/// A run of messages the heuristics consider one exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub index: usize,
    pub messages: Vec<Message>,
    pub authors: BTreeSet<String>,
    pub conversation_id: String,
    pub conversation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Unit {
    /// Build a unit from its messages, recomputing every derived field.
    ///
    /// `messages` must be non-empty; they are sorted by `created_at` here.
    pub fn from_messages(index: usize, mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.created_at);
        let first = &messages[0];
        let last = &messages[messages.len() - 1];
        Self {
            id: format!("unit-{}", index),
            index,
            authors: messages.iter().map(|m| m.author.clone()).collect(),
            conversation_id: first.conversation_id.clone(),
            conversation_name: first.conversation_name.clone(),
            start_time: first.created_at,
            end_time: last.created_at,
            messages,
        }
    }

    pub fn reindexed(mut self, index: usize) -> Self {
        self.id = format!("unit-{}", index);
        self.index = index;
        self
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Where a validated unit came from, in terms of atomic unit indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UnitOrigin {
    /// Kept as built.
    Original { index: usize },
    /// Several atomic units combined.
    #[serde(rename_all = "camelCase")]
    Merged { merged_from: Vec<usize> },
    /// A slice of one atomic unit; `split_range` is a half-open message range.
    #[serde(rename_all = "camelCase")]
    Split {
        split_from: usize,
        split_range: (usize, usize),
    },
}

impl UnitOrigin {
    /// Atomic unit indices this unit draws messages from.
    pub fn source_indices(&self) -> Vec<usize> {
        match self {
            UnitOrigin::Original { index } => vec![*index],
            UnitOrigin::Merged { merged_from } => merged_from.clone(),
            UnitOrigin::Split { split_from, .. } => vec![*split_from],
        }
    }
}

/// An atomic unit after oracle-assisted split/merge correction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedUnit {
    #[serde(flatten)]
    pub unit: Unit,
    pub origin: UnitOrigin,
}

impl ValidatedUnit {
    pub fn original(unit: Unit) -> Self {
        let origin = UnitOrigin::Original { index: unit.index };
        Self { unit, origin }
    }

    /// Combine several validated units into one, keeping every message once.
    pub fn merge(parts: &[ValidatedUnit]) -> Self {
        let mut sources: Vec<usize> = parts.iter().flat_map(|p| p.origin.source_indices()).collect();
        sources.sort_unstable();
        sources.dedup();

        let messages: Vec<Message> = parts.iter().flat_map(|p| p.unit.messages.clone()).collect();
        let index = parts.first().map(|p| p.unit.index).unwrap_or_default();
        Self {
            unit: Unit::from_messages(index, messages),
            origin: UnitOrigin::Merged {
                merged_from: sources,
            },
        }
    }
}

/// A topic-level cluster. Grows by appending during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub messages: Vec<Message>,
}

impl Stack {
    pub fn new(id: String, title: String, summary: String, messages: Vec<Message>) -> Self {
        let mut stack = Self {
            id,
            title,
            summary,
            messages: Vec::new(),
        };
        stack.absorb(messages);
        stack
    }

    /// Append messages, keeping the stack ordered by `created_at`.
    pub fn absorb(&mut self, messages: Vec<Message>) {
        self.messages.extend(messages);
        self.messages.sort_by_key(|m| m.created_at);
    }

    /// Authors in order of first appearance.
    pub fn participants(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.messages
            .iter()
            .filter(|m| seen.insert(m.author.as_str()))
            .map(|m| m.author.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::fixtures::msg;

    #[test]
    fn test_unit_from_messages_derives_fields() {
        let unit = Unit::from_messages(
            3,
            vec![msg("b", 60, "bob", "second"), msg("a", 0, "alice", "first")],
        );
        assert_eq!(unit.id, "unit-3");
        assert_eq!(unit.messages[0].id, "a");
        assert_eq!(unit.start_time, unit.messages[0].created_at);
        assert_eq!(unit.end_time, unit.messages[1].created_at);
        assert_eq!(unit.authors.len(), 2);
    }

    #[test]
    fn test_merge_collects_sources() {
        let a = ValidatedUnit::original(Unit::from_messages(0, vec![msg("a", 0, "alice", "x")]));
        let b = ValidatedUnit {
            unit: Unit::from_messages(1, vec![msg("b", 10, "bob", "y")]),
            origin: UnitOrigin::Merged {
                merged_from: vec![1, 2],
            },
        };
        let merged = ValidatedUnit::merge(&[a, b]);
        assert_eq!(
            merged.origin,
            UnitOrigin::Merged {
                merged_from: vec![0, 1, 2]
            }
        );
        assert_eq!(merged.unit.len(), 2);
    }

    #[test]
    fn test_stack_participants_in_first_seen_order() {
        let stack = Stack::new(
            "stack-1".to_string(),
            "t".to_string(),
            "s".to_string(),
            vec![
                msg("c", 20, "carol", "z"),
                msg("a", 0, "bob", "x"),
                msg("b", 10, "carol", "y"),
            ],
        );
        assert_eq!(stack.participants(), vec!["bob", "carol"]);
    }
}
