use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::OracleError;

/// Decode the JSON object buried in an oracle reply.
///
/// Replies tend to arrive wrapped in prose or ```json fences, with the odd
/// trailing comma or bare key. We strip fences, keep the outermost `{...}`,
/// and if strict parsing fails, repair those two defects and try once more.
pub fn parse_lenient(raw: &str) -> Result<Value, OracleError> {
    let unfenced = strip_fences(raw);
    let body = outermost_object(&unfenced)
        .or_else(|| outermost_object(raw))
        .ok_or_else(|| OracleError::Parse(format!("no JSON object in {} char reply", raw.len())))?;

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    let repaired = quote_bare_keys(&strip_trailing_commas(body));
    serde_json::from_str::<Value>(&repaired).map_err(|e| OracleError::Parse(e.to_string()))
}

/// A 1-based number as the oracle writes it: `3`, `"3"`, `"Unit 3"`.
pub fn index_from(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s
            .trim()
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .ok(),
        _ => None,
    }
}

/// One number or a list of numbers.
pub fn indices_from(value: &Value) -> Vec<usize> {
    match value {
        Value::Array(items) => items.iter().filter_map(index_from).collect(),
        other => index_from(other).into_iter().collect(),
    }
}

pub fn flag_from(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "y"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Free text; `null`, numbers and other non-strings read as empty.
pub fn text_from(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// `deserialize_with` adapters for reply structs.
pub fn deserialize_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(text_from(&Value::deserialize(d)?))
}

pub fn deserialize_index<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    Ok(index_from(&Value::deserialize(d)?))
}

pub fn deserialize_indices<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<usize>, D::Error> {
    Ok(indices_from(&Value::deserialize(d)?))
}

pub fn deserialize_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(flag_from(&Value::deserialize(d)?))
}

/// Content of the first fenced block, or the input unchanged if there is none.
fn strip_fences(raw: &str) -> String {
    let Some(start) = raw.find("```") else {
        return raw.to_string();
    };
    let after_tag = &raw[start + 3..];
    // Skip the rest of the opening fence line (language tag)
    let body_start = after_tag.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_tag[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    body[..end].to_string()
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Drop commas that directly precede `}` or `]`, ignoring string contents.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Quote identifiers used as object keys: `{action: "keep"}` -> `{"action": "keep"}`.
fn quote_bare_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => {
                    in_string = false;
                    last_significant = Some('"');
                }
                _ => {}
            }
            i += 1;
            continue;
        }

        let key_position = matches!(last_significant, Some('{') | Some(','));
        if key_position && (ch.is_ascii_alphabetic() || ch == '_') {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let colon_follows = chars[i..]
                .iter()
                .find(|c| !c.is_whitespace())
                .is_some_and(|c| *c == ':');
            if colon_follows {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            } else {
                out.push_str(&ident);
            }
            last_significant = Some(chars[i - 1]);
            continue;
        }

        if ch == '"' {
            in_string = true;
        }
        if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
        out.push(ch);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let v = parse_lenient(r#"{"action": "keep"}"#).unwrap();
        assert_eq!(v["action"], "keep");
    }

    #[test]
    fn test_fenced_object() {
        let raw = "Here you go:\n```json\n{\"segment\": \"S2\", \"confidence\": 0.8}\n```\nHope that helps.";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["segment"], "S2");
        assert_eq!(v["confidence"], 0.8);
    }

    #[test]
    fn test_prose_wrapped_object() {
        let raw = "Sure! {\"continues\": true, \"reasoning\": \"same bug {login}\"} -- done";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["continues"], true);
        assert_eq!(v["reasoning"], "same bug {login}");
    }

    #[test]
    fn test_trailing_commas_repaired() {
        let raw = r#"{"units": [{"unit": 1, "action": "keep",}, {"unit": 2, "action": "merge", "merge_with": [3,],},],}"#;
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["units"][1]["merge_with"][0], 3);
    }

    #[test]
    fn test_bare_keys_repaired() {
        let raw = r#"{action: "join", stack_index: 2, flags: [true, false], title: "Login, again"}"#;
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["action"], "join");
        assert_eq!(v["stack_index"], 2);
        assert_eq!(v["flags"][0], true);
        assert_eq!(v["title"], "Login, again");
    }

    #[test]
    fn test_commas_inside_strings_untouched() {
        let raw = r#"{"reasoning": "a, }", "x": 1,}"#;
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["reasoning"], "a, }");
    }

    #[test]
    fn test_index_shapes() {
        assert_eq!(index_from(&serde_json::json!(3)), Some(3));
        assert_eq!(index_from(&serde_json::json!("Unit 4")), Some(4));
        assert_eq!(index_from(&serde_json::json!(-1)), None);
        assert_eq!(indices_from(&serde_json::json!([1, "2", null])), vec![1, 2]);
        assert_eq!(indices_from(&serde_json::json!(5)), vec![5]);
        assert!(flag_from(&serde_json::json!("Yes")));
        assert!(!flag_from(&serde_json::json!(null)));
        assert_eq!(text_from(&serde_json::json!(null)), "");
        assert_eq!(text_from(&serde_json::json!("join")), "join");
    }

    #[test]
    fn test_no_object_is_parse_error() {
        let err = parse_lenient("I could not decide.").unwrap_err();
        assert!(matches!(err, OracleError::Parse(_)));
    }

    #[test]
    fn test_irreparable_is_parse_error() {
        let err = parse_lenient("{\"a\": [1, 2}").unwrap_err();
        assert!(matches!(err, OracleError::Parse(_)));
    }
}
