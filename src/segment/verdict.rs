use serde_json::Value;

use super::state::Role;

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Which segment the oracle picked.
#[derive(Debug, Clone, PartialEq)]
pub enum Choice {
    New,
    /// Named segment; may or may not exist.
    Named(String),
    /// "Continues" the reference topic.
    Continue,
    /// No usable answer in the reply.
    Missing,
}

/// Oracle reply decoded into one shape, whatever strategy produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub choice: Choice,
    pub attaches_to: Option<String>,
    pub role: Option<Role>,
    pub confidence: f64,
    pub reasoning: String,
    pub summary: Option<String>,
}

impl Verdict {
    /// Normalize a reply. Accepts `conversation`, `segment` or `segmentId` for
    /// the target, a `continues` flag or `decision` string, and a speech act
    /// given as a string or as an object with its own confidence.
    pub fn from_reply(reply: &Value) -> Self {
        let (role, act_confidence) = first_of(reply, &["role", "speech_act", "speechAct", "act"])
            .map(role_from)
            .unwrap_or((None, None));

        let confidence = first_of(reply, &["confidence", "score"])
            .and_then(number_from)
            .or(act_confidence)
            .map(normalize_confidence)
            .unwrap_or(DEFAULT_CONFIDENCE);

        Self {
            choice: choice_from(reply),
            attaches_to: first_of(reply, &["attachesTo", "attaches_to", "reply_to", "replyTo"])
                .and_then(id_from),
            role,
            confidence,
            reasoning: first_of(reply, &["reasoning", "reason", "explanation"])
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            summary: first_of(reply, &["summary", "topic"])
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

fn first_of<'a>(reply: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| reply.get(k))
        .find(|v| !v.is_null())
}

fn choice_from(reply: &Value) -> Choice {
    if let Some(target) = first_of(reply, &["conversation", "segment", "segment_id", "segmentId"]) {
        match target {
            Value::String(s) if is_new(s) => return Choice::New,
            Value::String(s) if !s.trim().is_empty() => return Choice::Named(s.trim().to_string()),
            Value::Number(n) => return Choice::Named(n.to_string()),
            _ => {}
        }
    }

    match first_of(reply, &["continues", "continue"]) {
        Some(Value::Bool(true)) => return Choice::Continue,
        Some(Value::Bool(false)) => return Choice::New,
        _ => {}
    }

    if let Some(decision) = first_of(reply, &["decision", "action"]).and_then(Value::as_str) {
        let decision = decision.trim().to_lowercase();
        if decision.starts_with("continue") || decision == "same" {
            return Choice::Continue;
        }
        if decision.starts_with("new") {
            return Choice::New;
        }
    }

    Choice::Missing
}

fn is_new(s: &str) -> bool {
    let s = s.trim().to_uppercase();
    s == "NEW" || s.starts_with("NEW ") || s.starts_with("NEW_")
}

fn role_from(value: &Value) -> (Option<Role>, Option<f64>) {
    match value {
        Value::String(s) => (parse_role(s), None),
        Value::Object(fields) => {
            let role = ["type", "act", "role", "label", "name"]
                .iter()
                .filter_map(|k| fields.get(*k))
                .filter_map(Value::as_str)
                .find_map(parse_role);
            let confidence = fields.get("confidence").and_then(number_from);
            (role, confidence)
        }
        _ => (None, None),
    }
}

pub fn parse_role(s: &str) -> Option<Role> {
    let s = s.trim().to_lowercase();
    if s.starts_with("initiat") || s.starts_with("start") {
        Some(Role::Initiates)
    } else if s.starts_with("develop") || s.starts_with("elaborat") {
        Some(Role::Develops)
    } else if s.starts_with("respond") || s.starts_with("repl") || s.starts_with("answer") {
        Some(Role::Responds)
    } else if s.starts_with("resol") || s.starts_with("close") {
        Some(Role::Resolves)
    } else if s.starts_with("react") {
        Some(Role::Reacts)
    } else {
        None
    }
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// Clamp into [0, 1]; values in (1, 100] are read as percentages.
fn normalize_confidence(c: f64) -> f64 {
    if !c.is_finite() {
        return DEFAULT_CONFIDENCE;
    }
    let c = if c > 1.0 && c <= 100.0 { c / 100.0 } else { c };
    c.clamp(0.0, 1.0)
}

fn id_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_segment_centric_shape() {
        let v = Verdict::from_reply(&json!({
            "segment": "S2",
            "attachesTo": "m7",
            "role": "RESPONDS",
            "confidence": 0.9,
            "reasoning": "answers the question"
        }));
        assert_eq!(v.choice, Choice::Named("S2".to_string()));
        assert_eq!(v.attaches_to.as_deref(), Some("m7"));
        assert_eq!(v.role, Some(Role::Responds));
        assert_eq!(v.confidence, 0.9);
        assert_eq!(v.reasoning, "answers the question");
    }

    #[test]
    fn test_conversation_field_and_structured_act() {
        let v = Verdict::from_reply(&json!({
            "conversation": "new",
            "speech_act": {"type": "initiating", "confidence": 80},
            "topic": "Build cache"
        }));
        assert_eq!(v.choice, Choice::New);
        assert_eq!(v.role, Some(Role::Initiates));
        assert_eq!(v.confidence, 0.8);
        assert_eq!(v.summary.as_deref(), Some("Build cache"));
    }

    #[test]
    fn test_continues_flag() {
        let yes = Verdict::from_reply(&json!({"continues": true, "speechAct": "develops"}));
        assert_eq!(yes.choice, Choice::Continue);
        assert_eq!(yes.role, Some(Role::Develops));

        let no = Verdict::from_reply(&json!({"continues": false}));
        assert_eq!(no.choice, Choice::New);

        let decided = Verdict::from_reply(&json!({"decision": "Continues"}));
        assert_eq!(decided.choice, Choice::Continue);
    }

    #[test]
    fn test_numeric_segment_and_defaults() {
        let v = Verdict::from_reply(&json!({"segment_id": 3, "role": "shrug"}));
        assert_eq!(v.choice, Choice::Named("3".to_string()));
        assert_eq!(v.role, None);
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);
        assert!(v.reasoning.is_empty());
    }

    #[test]
    fn test_missing_target() {
        let v = Verdict::from_reply(&json!({"segment": null, "reasoning": "unsure"}));
        assert_eq!(v.choice, Choice::Missing);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Verdict::from_reply(&json!({"confidence": 250})).confidence, 1.0);
        assert_eq!(Verdict::from_reply(&json!({"confidence": -0.2})).confidence, 0.0);
        assert_eq!(Verdict::from_reply(&json!({"confidence": "75%"})).confidence, 0.75);
    }

    #[test]
    fn test_role_prefixes() {
        assert_eq!(parse_role("Reply"), Some(Role::Responds));
        assert_eq!(parse_role("resolution"), Some(Role::Resolves));
        assert_eq!(parse_role("REACTS"), Some(Role::Reacts));
        assert_eq!(parse_role("closes"), Some(Role::Resolves));
    }
}
