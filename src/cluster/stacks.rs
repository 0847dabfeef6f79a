use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::prompts::{self, describe_stack, describe_unit};
use super::types::{Stack, ValidatedUnit};
use crate::chat::types::truncate_chars;
use crate::config::StackConfig;
use crate::oracle::json::{deserialize_text, index_from};
use crate::oracle::{self, Oracle, OracleFailure, Pacer};

const FALLBACK_SUMMARY_CHARS: usize = 120;

#[derive(Debug, Default, Deserialize)]
struct StackDecision {
    #[serde(default, deserialize_with = "deserialize_text")]
    action: String,
    #[serde(default)]
    stack_index: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_text")]
    title: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    summary: String,
}

impl StackDecision {
    /// Zero-based target if the reply asked to join an existing stack.
    fn join_target(&self, stack_count: usize) -> Option<usize> {
        if !self.action.trim().eq_ignore_ascii_case("join") {
            return None;
        }
        self.stack_index
            .as_ref()
            .and_then(index_from)
            .and_then(|n| n.checked_sub(1))
            .filter(|&i| i < stack_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Joined(usize),
    Created(usize),
}

pub struct StackReport {
    pub stacks: Vec<Stack>,
    pub failures: Vec<OracleFailure>,
    pub oracle_calls: usize,
}

/// Greedy one-pass clustering: each unit, in order, joins one existing stack or opens a new one.
pub async fn assign_stacks(
    oracle: &dyn Oracle,
    units: &[ValidatedUnit],
    config: &StackConfig,
    pacer: &mut Pacer,
) -> StackReport {
    let mut stacks = Vec::new();
    let mut failures = Vec::new();

    for unit in units {
        let (_, failure) = assign_unit(oracle, &mut stacks, unit, config, pacer).await;
        failures.extend(failure);
    }

    info!(
        units = units.len(),
        stacks = stacks.len(),
        failures = failures.len(),
        "stack assignment complete"
    );

    StackReport {
        stacks,
        failures,
        oracle_calls: units.len(),
    }
}

/// Place one unit. An oracle failure falls back to a new stack and is returned for reporting.
pub async fn assign_unit(
    oracle: &dyn Oracle,
    stacks: &mut Vec<Stack>,
    unit: &ValidatedUnit,
    config: &StackConfig,
    pacer: &mut Pacer,
) -> (Placement, Option<OracleFailure>) {
    let prompt = stack_prompt(stacks, unit, config);
    pacer.wait().await;

    let (decision, failure) =
        match oracle::ask::<StackDecision>(oracle, prompts::STACK_SYSTEM, &prompt, config.budget).await {
            Ok(decision) => (decision, None),
            Err(error) => {
                warn!(unit = %unit.unit.id, %error, "stack decision failed, creating new stack");
                let failure = OracleFailure::new(format!("stack assignment for {}", unit.unit.id), error);
                (StackDecision::default(), Some(failure))
            }
        };

    let messages = unit.unit.messages.clone();
    if let Some(target) = decision.join_target(stacks.len()) {
        let stack = &mut stacks[target];
        stack.absorb(messages);
        if !decision.title.trim().is_empty() {
            stack.title = decision.title.trim().to_string();
        }
        if !decision.summary.trim().is_empty() {
            stack.summary = decision.summary.trim().to_string();
        }
        debug!(unit = %unit.unit.id, stack = %stack.id, "unit joined stack");
        return (Placement::Joined(target), failure);
    }

    let title = Some(decision.title.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} conversation", unit.unit.conversation_name));
    let summary = Some(decision.summary.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            truncate_chars(&unit.unit.messages[0].content, FALLBACK_SUMMARY_CHARS)
        });

    let id = format!("stack-{}", stacks.len() + 1);
    debug!(unit = %unit.unit.id, stack = %id, "unit opened stack");
    stacks.push(Stack::new(id, title, summary, messages));
    (Placement::Created(stacks.len() - 1), failure)
}

fn stack_prompt(stacks: &[Stack], unit: &ValidatedUnit, config: &StackConfig) -> String {
    let existing = if stacks.is_empty() {
        "(no stacks yet)".to_string()
    } else {
        stacks
            .iter()
            .enumerate()
            .map(|(i, s)| describe_stack(i + 1, s, config))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    format!(
        "Existing stacks:\n\n{}\n\nNew exchange:\n\n{}\n\nJoin an existing stack or create a new one.",
        existing,
        describe_unit("Exchange", &unit.unit)
    )
}
