//! Lenient parsing of model output. Models wrap JSON in code fences, prepend
//! prose, or skip the envelope entirely; every caller has a fallback for the
//! unparsable case.

use serde_json::Value;

/// Extract a JSON object from model output.
///
/// Tries, in order: a ```json fence, any leading ``` fence, the raw text,
/// and finally the first `{` .. last `}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let mut candidate = text.trim();

    if let Some(rest) = candidate.split_once("```json").map(|(_, r)| r) {
        candidate = rest.split("```").next().unwrap_or(rest).trim();
    } else if candidate.starts_with("```") {
        let body = &candidate[3..];
        // Skip an optional language tag on the opening fence line.
        let body = body.split_once('\n').map(|(_, r)| r).unwrap_or(body);
        candidate = body.split("```").next().unwrap_or(body).trim();
    }

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        if value.is_object() {
            return Some(value);
        }
    }

    // Last resort: the widest brace-delimited span.
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&candidate[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Extract the body of the first fenced code block with the given language tag.
pub fn extract_fence(text: &str, lang: &str) -> Option<String> {
    let open = format!("```{}", lang);
    let rest = text.split_once(&open).map(|(_, r)| r)?;
    let body = rest.split("```").next()?;
    let body = body.trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Pull a string field out of a JSON object, empty-trimmed strings excluded.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_json() {
        let text = "Here you go:\n```json\n{\"reply\": \"hi\"}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["reply"], "hi");
    }

    #[test]
    fn parses_bare_fence() {
        let text = "```\n{\"ok\": true}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn parses_raw_object() {
        assert_eq!(
            extract_json("  {\"a\": 1}  ").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn recovers_object_from_surrounding_prose() {
        let text = "Sure! {\"code\": \"graph TD\"} hope that helps";
        assert_eq!(extract_json(text).unwrap()["code"], "graph TD");
    }

    #[test]
    fn rejects_non_objects() {
        assert!(extract_json("just some prose").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn extracts_language_fence() {
        let text = "explanation\n```mermaid\ngraph TD\n  A --> B\n```\nmore";
        assert_eq!(
            extract_fence(text, "mermaid").unwrap(),
            "graph TD\n  A --> B"
        );
        assert!(extract_fence(text, "html").is_none());
    }
}
