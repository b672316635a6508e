use serde::Deserialize;

use crate::error::{GateError, GateResult};

/// Length in Unicode scalar values.
#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut `text` to at most `max` chars, backing up to the last word boundary when one exists.
/// Falls back to a hard cut for a single overlong word. Result is right-trimmed.
#[must_use]
pub fn truncate_at_word(text: &str, max: usize) -> String {
    if char_len(text) <= max {
        return text.trim_end().to_string();
    }
    let head: String = text.chars().take(max).collect();
    let next_is_space = text.chars().nth(max).is_some_and(char::is_whitespace);
    if !next_is_space {
        if let Some(pos) = head.rfind(char::is_whitespace) {
            let cut = head[..pos].trim_end();
            if !cut.is_empty() {
                return cut.to_string();
            }
        }
    }
    head.trim_end().to_string()
}

/// First `max` chars of `text`, for log excerpts.
#[must_use]
pub fn excerpt(text: &str, max: usize) -> String {
    let one_line = text.replace(['\r', '\n'], " ");
    if char_len(&one_line) <= max {
        return one_line;
    }
    let mut out: String = one_line.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Strip a surrounding Markdown code fence and stray quotes from a model reply.
#[must_use]
pub fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    s.trim().trim_matches('"').trim().to_string()
}

/// Parse the first JSON object in `text`, ignoring any prose before it and anything after it.
pub fn must_extract_json_obj(text: &str) -> GateResult<serde_json::Value> {
    let start = text
        .find('{')
        .ok_or_else(|| GateError::ShapeMismatch("no_json_object_start".to_string()))?;
    let slice = &text[start..];
    let mut de = serde_json::Deserializer::from_str(slice);
    let v: serde_json::Value = serde_json::Value::deserialize(&mut de)
        .map_err(|e| GateError::parse("json_parse_failed", e))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_prefers_word_boundary() {
        assert_eq!(truncate_at_word("spring hills rise", 14), "spring hills");
        assert_eq!(truncate_at_word("spring hills rise", 12), "spring hills");
        assert_eq!(truncate_at_word("abcdefghij", 4), "abcd");
        assert_eq!(truncate_at_word("short ", 10), "short");
    }

    #[test]
    fn extracts_json_after_fence_and_prose() {
        let raw = "```json\n{\"results\":[]}\n```";
        let v = must_extract_json_obj(&cleanup_model_text(raw)).unwrap();
        assert!(v.get("results").is_some());
        let v = must_extract_json_obj("Sure! {\"a\":1} trailing").unwrap();
        assert_eq!(v["a"], 1);
        assert!(must_extract_json_obj("no object").is_err());
    }

    #[test]
    fn excerpt_flattens_and_shortens() {
        assert_eq!(excerpt("a\nb", 10), "a b");
        assert_eq!(excerpt("abcdef", 3), "abc...");
    }
}
