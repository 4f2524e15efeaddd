//! crates/tutor_core/src/reasoning.rs
//!
//! Calling the reasoning service and repairing the structured output it returns.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::warn;

use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{Prompt, ReasoningService};

/// Sends a prompt and normalises every failure shape into `Outcome::Fallback`.
pub async fn ask(service: &dyn ReasoningService, prompt: &Prompt) -> Outcome<String> {
    let outcome = match service.generate(prompt).await {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Outcome::Fallback(FallbackReason::EmptyResponse)
            } else if trimmed.starts_with("Error:") {
                Outcome::Fallback(FallbackReason::ServiceError(trimmed.to_string()))
            } else {
                Outcome::Ok(trimmed.to_string())
            }
        }
        Err(e) => Outcome::Fallback(FallbackReason::ServiceError(e.to_string())),
    };

    if let Outcome::Fallback(reason) = &outcome {
        warn!(prompt_kind = prompt.kind.as_str(), %reason, "reasoning call fell back");
    }
    outcome
}

//=========================================================================================
// JSON repair
//=========================================================================================

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").expect("fence regex is valid")
    })
}

/// Removes a fenced code block wrapper if there is one.
pub fn strip_code_fences(raw: &str) -> &str {
    match fence_regex().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}

fn slice_between(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Parses the first JSON value that looks like what we want, tolerating prose around it.
fn parse_loose(raw: &str, open: char, close: char) -> Result<Value, String> {
    let cleaned = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }
    let sliced = slice_between(cleaned, open, close)
        .ok_or_else(|| format!("no JSON payload delimited by '{open}{close}'"))?;
    serde_json::from_str::<Value>(sliced).map_err(|e| e.to_string())
}

/// Flattens nested lists and decodes elements that were emitted as JSON strings.
fn flatten_elements(values: Vec<Value>, out: &mut Vec<Value>) {
    for value in values {
        match value {
            Value::Array(inner) => flatten_elements(inner, out),
            Value::String(s) => match serde_json::from_str::<Value>(strip_code_fences(&s)) {
                Ok(Value::Array(inner)) => flatten_elements(inner, out),
                Ok(decoded @ Value::Object(_)) => out.push(decoded),
                _ => out.push(Value::String(s)),
            },
            other => out.push(other),
        }
    }
}

/// Extracts a flat array of values from model output.
pub fn parse_json_array(raw: &str) -> Result<Vec<Value>, String> {
    let value = parse_loose(raw, '[', ']')?;
    let values = match value {
        Value::Array(values) => values,
        // `{"questions": [...]}` style wrappers.
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(values) => Some(values),
                _ => None,
            })
            .ok_or_else(|| "object without an array member".to_string())?,
        Value::String(s) => return parse_json_array(&s),
        other => return Err(format!("expected an array, got {other}")),
    };

    let mut flat = Vec::with_capacity(values.len());
    flatten_elements(values, &mut flat);
    Ok(flat)
}

/// Extracts a JSON object from model output.
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>, String> {
    match parse_loose(raw, '{', '}')? {
        Value::Object(map) => Ok(map),
        Value::Array(values) => values
            .into_iter()
            .find_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .ok_or_else(|| "array without an object element".to_string()),
        Value::String(s) => parse_json_object(&s),
        other => Err(format!("expected an object, got {other}")),
    }
}

/// Reads a number that may have been emitted as a string ("0.8", "80%").
pub fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim().trim_end_matches('%').trim();
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    }
    .filter(|n| n.is_finite())
}

pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PortError, PortResult, PromptKind};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(PortResult<String>);

    #[async_trait]
    impl ReasoningService for Fixed {
        async fn generate(&self, _prompt: &Prompt) -> PortResult<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(PortError::Unexpected(e.to_string())),
            }
        }
    }

    fn prompt() -> Prompt {
        Prompt::new(PromptKind::Evaluation, "grade this", 10)
    }

    #[tokio::test]
    async fn error_prefixed_text_is_a_fallback() {
        let service = Fixed(Ok("Error: quota exceeded".into()));
        assert!(matches!(
            ask(&service, &prompt()).await,
            Outcome::Fallback(FallbackReason::ServiceError(_))
        ));
    }

    #[tokio::test]
    async fn blank_text_and_transport_errors_fall_back() {
        let blank = Fixed(Ok("   \n".into()));
        assert_eq!(ask(&blank, &prompt()).await, Outcome::Fallback(FallbackReason::EmptyResponse));

        let broken = Fixed(Err(PortError::Unexpected("boom".into())));
        assert!(ask(&broken, &prompt()).await.is_fallback());
    }

    #[tokio::test]
    async fn successful_text_is_trimmed() {
        let service = Fixed(Ok("  MIXED \n".into()));
        assert_eq!(ask(&service, &prompt()).await, Outcome::Ok("MIXED".to_string()));
    }

    #[test]
    fn strips_fenced_blocks() {
        let raw = "Sure! Here you go:\n```json\n[{\"a\": 1}]\n```\nThanks";
        assert_eq!(parse_json_array(raw).unwrap(), vec![json!({"a": 1})]);
    }

    #[test]
    fn flattens_list_of_lists_and_stringified_elements() {
        let raw = r#"[[{"a": 1}, {"a": 2}], "{\"a\": 3}"]"#;
        let parsed = parse_json_array(raw).unwrap();
        assert_eq!(parsed, vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
    }

    #[test]
    fn unwraps_object_wrappers_around_arrays() {
        let raw = r#"{"questions": [{"a": 1}]}"#;
        assert_eq!(parse_json_array(raw).unwrap(), vec![json!({"a": 1})]);
    }

    #[test]
    fn finds_objects_inside_prose() {
        let raw = "The grade is {\"score\": 0.8, \"correct\": true} as requested.";
        let map = parse_json_object(raw).unwrap();
        assert_eq!(number_field(&map, "score"), Some(0.8));
        assert_eq!(bool_field(&map, "correct"), Some(true));
    }

    #[test]
    fn rejects_payloads_without_json() {
        assert!(parse_json_object("no json here").is_err());
        assert!(parse_json_array("still nothing").is_err());
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let map = parse_json_object(r#"{"xp": "85", "confidence": "70%", "bad": "n/a"}"#).unwrap();
        assert_eq!(number_field(&map, "xp"), Some(85.0));
        assert_eq!(number_field(&map, "confidence"), Some(70.0));
        assert_eq!(number_field(&map, "bad"), None);
    }
}
