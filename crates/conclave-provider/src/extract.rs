//! Tolerant extraction of JSON from LLM output.
//!
//! Models wrap JSON in prose, code fences, or partial sentences. The
//! strategy: try a strict parse first; failing that, scan for the first
//! balanced `{…}` object and parse that; on a second failure the caller
//! falls back to its conservative default.

use serde::de::DeserializeOwned;

/// Parse a value of type `T` out of `text`, tolerating surrounding noise.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Some(value);
    }
    let candidate = first_json_object(trimmed)?;
    serde_json::from_str::<T>(candidate).ok()
}

/// The first balanced `{…}` substring, respecting string literals and
/// escapes so braces inside values don't confuse the depth count.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Decision {
        #[serde(rename = "shouldParticipate")]
        should_participate: bool,
        reason: String,
    }

    #[test]
    fn strict_json_parses_directly() {
        let parsed: Decision =
            extract_json(r#"{"shouldParticipate": true, "reason": "on topic"}"#).unwrap();
        assert!(parsed.should_participate);
    }

    #[test]
    fn json_inside_prose_is_recovered() {
        let text = "Sure! Here's my answer:\n```json\n{\"shouldParticipate\": false, \"reason\": \"already covered\"}\n```\nHope that helps.";
        let parsed: Decision = extract_json(text).unwrap();
        assert!(!parsed.should_participate);
        assert_eq!(parsed.reason, "already covered");
    }

    #[test]
    fn braces_inside_strings_do_not_break_balancing() {
        let text = r#"prefix {"shouldParticipate": true, "reason": "looks like {json}"} suffix"#;
        let parsed: Decision = extract_json(text).unwrap();
        assert_eq!(parsed.reason, "looks like {json}");
    }

    #[test]
    fn garbage_returns_none() {
        assert!(extract_json::<Decision>("no json here at all").is_none());
        assert!(extract_json::<Decision>("{ broken").is_none());
    }

    #[test]
    fn first_object_wins_when_multiple_present() {
        let text = r#"{"a": 1} {"b": 2}"#;
        assert_eq!(first_json_object(text), Some(r#"{"a": 1}"#));
    }
}
