//! JSON extraction and schema validation for structured output.

use crate::error::{LlmError, Result};
use serde_json::Value;

/// Pull the most plausible JSON object out of a model response.
///
/// Tries a fenced ```json block first, then the first balanced `{…}` region.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced(text) {
        return Some(fenced);
    }
    extract_balanced(text)
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```json").map(|i| i + "```json".len()).or_else(|| {
        // A bare fence directly followed by an object also counts.
        text.find("```").and_then(|i| {
            let rest = text[i + 3..].trim_start();
            rest.starts_with('{').then_some(i + 3)
        })
    })?;
    let body = &text[start..];
    let end = body.find("```")?;
    let candidate = body[..end].trim();
    candidate.starts_with('{').then(|| candidate.to_string())
}

fn extract_balanced(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a response and validate it against the schema.
pub fn parse_validated(response: &str, schema: &Value) -> Result<Value> {
    let json_text = extract_json(response)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON object in response".to_string()))?;
    let instance: Value = serde_json::from_str(&json_text)
        .map_err(|e| LlmError::InvalidResponse(format!("malformed JSON: {e}")))?;

    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| LlmError::Fatal(format!("invalid schema: {e}")))?;
    if let Err(errors) = compiled.validate(&instance) {
        let details: Vec<String> = errors.map(|e| e.to_string()).take(3).collect();
        return Err(LlmError::InvalidResponse(format!(
            "schema validation failed: {}",
            details.join("; ")
        )));
    }
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "score": {"type": "number"}
            },
            "required": ["name", "score"]
        })
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"name\": \"a\", \"score\": 1}\n```\nDone.";
        let extracted = extract_json(text).unwrap();
        assert!(extracted.starts_with('{'));
        assert!(extracted.contains("\"score\""));
    }

    #[test]
    fn extracts_balanced_object_from_prose() {
        let text = "The result is {\"name\": \"x\", \"score\": 0.5} as requested.";
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted, "{\"name\": \"x\", \"score\": 0.5}");
    }

    #[test]
    fn nested_braces_and_strings_do_not_confuse_extraction() {
        let text = r#"{"name": "has } brace", "score": 1, "extra": {"deep": true}} trailing"#;
        let extracted = extract_json(text).unwrap();
        let parsed: Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(parsed["extra"]["deep"], json!(true));
    }

    #[test]
    fn validates_against_schema() {
        let ok = parse_validated(r#"{"name": "a", "score": 0.9}"#, &schema()).unwrap();
        assert_eq!(ok["name"], json!("a"));

        let err = parse_validated(r#"{"name": "a"}"#, &schema()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn no_json_is_an_error() {
        let err = parse_validated("I cannot answer in JSON.", &schema()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
