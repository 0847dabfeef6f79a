use super::types::{Stack, Unit};
use crate::chat::Message;
use crate::config::StackConfig;

/// Characters of each message shown to the oracle.
const MESSAGE_CHARS: usize = 280;

pub const VALIDATE_SYSTEM: &str = r#"You review groupings of chat messages. Each numbered unit is meant to hold exactly one coherent exchange: a question and its answers, one discussion thread, one announcement and its reactions.

For every unit decide:
- "keep": the unit is one coherent exchange.
- "split": the unit mixes separate exchanges. Give "split_points": the 1-based message numbers AFTER which a new exchange begins (e.g. [3] splits messages 1-3 from 4-end).
- "merge": the unit continues the same exchange as other units in this batch. Give "merge_with": the unit numbers it belongs with.

Prefer "keep" when unsure. Only merge units that are clearly the same exchange, not merely the same broad subject.

Reply with JSON only:
{"units": [{"unit": 1, "action": "keep"}, {"unit": 2, "action": "split", "split_points": [3]}, {"unit": 3, "action": "merge", "merge_with": [4]}]}"#;

pub const PAIR_SYSTEM: &str = r#"You check whether two consecutive groups of chat messages are really one exchange that was cut in two. Answer merge=true only when the second unit directly continues the first (same question, same problem, same plan). Different subjects, or the same broad subject with a fresh exchange, are merge=false.

Reply with JSON only:
{"pairs": [{"pair": 1, "merge": false}, {"pair": 2, "merge": true}]}"#;

pub const STACK_SYSTEM: &str = r#"You organise chat exchanges into topic stacks. A stack collects every exchange about one topic, project or problem, even when the exchanges are hours apart.

Given a new exchange and the existing stacks, either join the exchange to the single best matching stack or create a new stack. Join only when the topic genuinely matches.

Always return a short title (max 8 words) and a one or two sentence summary describing the stack AFTER this exchange is included.

Reply with JSON only:
{"action": "join", "stack_index": 2, "title": "...", "summary": "..."}
or
{"action": "create", "title": "...", "summary": "..."}"#;

pub fn describe_message(position: usize, message: &Message) -> String {
    format!(
        "  {}. [{}] {}: {}",
        position,
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.author,
        message.snippet(MESSAGE_CHARS)
    )
}

/// Multi-line description of a unit under the given label.
pub fn describe_unit(label: &str, unit: &Unit) -> String {
    let mut out = format!(
        "{} (#{}, {} to {}, {} messages)\n",
        label,
        unit.conversation_name,
        unit.start_time.format("%Y-%m-%d %H:%M"),
        unit.end_time.format("%H:%M"),
        unit.len()
    );
    let lines: Vec<String> = unit
        .messages
        .iter()
        .enumerate()
        .map(|(i, m)| describe_message(i + 1, m))
        .collect();
    out.push_str(&lines.join("\n"));
    out
}

/// Compact stack description: full listing for small stacks, head and tail otherwise.
pub fn describe_stack(position: usize, stack: &Stack, config: &StackConfig) -> String {
    let mut out = format!(
        "Stack {}: \"{}\" ({} messages)\nSummary: {}\n",
        position,
        stack.title,
        stack.messages.len(),
        stack.summary
    );

    let total = stack.messages.len();
    let full = total <= config.full_listing_max
        || total <= config.head_messages + config.tail_messages;
    let lines: Vec<String> = if full {
        stack
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| describe_message(i + 1, m))
            .collect()
    } else {
        let tail_start = total - config.tail_messages;
        let mut lines: Vec<String> = stack.messages[..config.head_messages]
            .iter()
            .enumerate()
            .map(|(i, m)| describe_message(i + 1, m))
            .collect();
        lines.push(format!(
            "  ... {} more messages ...",
            tail_start - config.head_messages
        ));
        lines.extend(
            stack.messages[tail_start..]
                .iter()
                .enumerate()
                .map(|(i, m)| describe_message(tail_start + i + 1, m)),
        );
        lines
    };
    out.push_str(&lines.join("\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::fixtures::msg;

    #[test]
    fn test_describe_unit_lists_every_message() {
        let unit = Unit::from_messages(
            0,
            vec![msg("a", 0, "alice", "first"), msg("b", 30, "bob", "second")],
        );
        let text = describe_unit("Unit 1", &unit);
        assert!(text.starts_with("Unit 1 (#general"));
        assert!(text.contains("1. [2024-03-01 09:00] alice: first"));
        assert!(text.contains("2. [2024-03-01 09:00] bob: second"));
    }

    #[test]
    fn test_describe_large_stack_shows_head_and_tail() {
        let messages = (0..14)
            .map(|i| msg(&format!("m{}", i), i * 60, "alice", &format!("line {}", i)))
            .collect();
        let stack = Stack::new("stack-1".into(), "Deploys".into(), "deploy talk".into(), messages);
        let text = describe_stack(1, &stack, &StackConfig::default());

        assert!(text.contains("line 0"));
        assert!(text.contains("line 4"));
        assert!(!text.contains("line 5"));
        assert!(text.contains("... 7 more messages ..."));
        assert!(text.contains("13. ["));
        assert!(text.contains("line 13"));
    }

    #[test]
    fn test_describe_small_stack_in_full() {
        let messages = (0..10)
            .map(|i| msg(&format!("m{}", i), i * 60, "alice", &format!("line {}", i)))
            .collect();
        let stack = Stack::new("stack-1".into(), "t".into(), "s".into(), messages);
        let text = describe_stack(1, &stack, &StackConfig::default());
        assert!(!text.contains("more messages"));
        assert!(text.contains("line 9"));
    }
}
