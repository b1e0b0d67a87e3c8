//! Tagged model payloads.
//!
//! Reasoning prompts ask for JSON, but models wrap it in prose, emit partial
//! objects, or ignore the format entirely. [`Payload::parse`] never fails: a
//! parse miss degrades to [`Payload::Raw`], which reads as
//! `{"raw_response": text, "confidence": 0.5}`.

use serde_json::{Map, Value};

/// Confidence recorded for unstructured output.
pub const RAW_CONFIDENCE: f64 = 0.5;
/// Confidence recorded when a structured payload omits one.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(Map<String, Value>),
    Raw(String),
}

impl Payload {
    /// Parse the span from the first `{` to the last `}` as a JSON object.
    pub fn parse(text: &str) -> Self {
        let span = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if end > start => &text[start..=end],
            _ => return Payload::Raw(text.to_string()),
        };
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => Payload::Structured(map),
            _ => Payload::Raw(text.to_string()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Payload::Structured(map) => map.get(key),
            Payload::Raw(_) => None,
        }
    }

    /// Non-empty array under `key`.
    pub fn list(&self, key: &str) -> Option<&[Value]> {
        match self.get(key) {
            Some(Value::Array(items)) if !items.is_empty() => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Confidence under `key`, clamped to `[0, 1]`.
    ///
    /// Raw payloads report [`RAW_CONFIDENCE`]; structured payloads without a
    /// usable value report [`DEFAULT_CONFIDENCE`].
    pub fn confidence(&self, key: &str) -> f64 {
        match self {
            Payload::Raw(_) => RAW_CONFIDENCE,
            Payload::Structured(map) => map
                .get(key)
                .and_then(confidence_value)
                .unwrap_or(DEFAULT_CONFIDENCE),
        }
    }

    /// Text stored as a node thought: compact JSON or the raw response.
    pub fn to_thought(&self) -> String {
        match self {
            Payload::Structured(map) => Value::Object(map.clone()).to_string(),
            Payload::Raw(text) => text.clone(),
        }
    }

    /// String under `key`, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// Confidence carried by a JSON value, clamped to `[0, 1]`.
///
/// Accepts numbers and numeric strings ("0.8"); anything else is `None`.
pub fn confidence_value(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw.is_nan() {
        return None;
    }
    Some(raw.clamp(0.0, 1.0))
}

/// Thought text for one item of a structured list.
pub fn item_thought(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Confidence of one list item, falling back to [`DEFAULT_CONFIDENCE`].
pub fn item_confidence(item: &Value) -> f64 {
    item.get("confidence")
        .and_then(confidence_value)
        .unwrap_or(DEFAULT_CONFIDENCE)
}
