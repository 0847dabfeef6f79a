//! Pipeline A: messages -> atomic units -> validated units -> stacks.

pub mod prompts;
pub mod stacks;
pub mod types;
pub mod units;
pub mod validate;

pub use types::{Stack, Unit, ValidatedUnit};

use stacks::assign_stacks;
use units::build_units;
use validate::validate_units;

use tracing::info;

use crate::chat::Message;
use crate::config::PipelineConfig;
use crate::oracle::{Oracle, OracleFailure, Pacer};

pub struct StackPipelineReport {
    pub units: Vec<Unit>,
    pub validated: Vec<ValidatedUnit>,
    pub stacks: Vec<Stack>,
    pub failures: Vec<OracleFailure>,
    pub oracle_calls: usize,
}

/// Run every stage of pipeline A over one ordered message set.
pub async fn build_stacks(
    oracle: &dyn Oracle,
    messages: &[Message],
    config: &PipelineConfig,
) -> StackPipelineReport {
    let mut sorted = messages.to_vec();
    sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut pacer = Pacer::new(config.call_delay);
    let units = build_units(&sorted);
    info!(messages = sorted.len(), units = units.len(), "atomic units built");

    let validation = validate_units(oracle, &units, &config.validation, &mut pacer).await;
    let stacked = assign_stacks(oracle, &validation.units, &config.stacks, &mut pacer).await;

    let mut failures = validation.failures;
    failures.extend(stacked.failures);

    StackPipelineReport {
        units,
        validated: validation.units,
        stacks: stacked.stacks,
        failures,
        oracle_calls: validation.oracle_calls + stacked.oracle_calls,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::chat::types::fixtures::{in_conversation, in_thread, msg};
    use crate::oracle::testing::ScriptedOracle;

    fn config() -> PipelineConfig {
        PipelineConfig {
            call_delay: Duration::ZERO,
            ..PipelineConfig::default()
        }
    }

    fn corpus() -> Vec<Message> {
        vec![
            msg("1", 0, "alice", "the staging deploy failed again"),
            msg("2", 20, "bob", "looking at the logs now"),
            in_conversation(msg("3", 600, "carol", "anyone up for lunch at noon today"), "random"),
            msg("4", 4000, "dave", "new onboarding docs are published"),
            in_thread(msg("5", 9000, "bob", "it was the expired certificate"), "1"),
            msg("6", 20000, "erin", "quarterly planning meeting moved to thursday afternoon"),
        ]
    }

    #[tokio::test]
    async fn test_every_message_lands_in_one_stack() {
        let oracle = ScriptedOracle::new(|system, _| {
            if system == prompts::STACK_SYSTEM {
                Ok(r#"{"action": "join", "stack_index": 1, "title": "Everything", "summary": "All of it."}"#.to_string())
            } else if system == prompts::PAIR_SYSTEM {
                Ok(r#"{"pairs": []}"#.to_string())
            } else {
                Ok(r#"{"units": []}"#.to_string())
            }
        });
        let input = corpus();
        let report = build_stacks(&oracle, &input, &config()).await;

        assert_eq!(report.stacks.len(), 1);
        assert_eq!(report.stacks[0].messages.len(), input.len());
        assert_eq!(report.oracle_calls, oracle.calls());
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_dead_oracle_still_covers_everything() {
        let oracle = ScriptedOracle::failing();
        let input = corpus();
        let report = build_stacks(&oracle, &input, &config()).await;

        let mut seen = HashSet::new();
        for stack in &report.stacks {
            for m in &stack.messages {
                assert!(seen.insert(m.id.clone()), "duplicate {}", m.id);
            }
        }
        assert_eq!(seen.len(), input.len());
        assert_eq!(report.stacks.len(), report.validated.len());
        assert_eq!(report.validated.len(), report.units.len());
        // thread reply rejoined its root's unit
        assert!(report.units[0].messages.iter().any(|m| m.id == "5"));
    }
}
