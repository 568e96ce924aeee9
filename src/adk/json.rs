// SPDX-License-Identifier: MIT

//! Lenient JSON recovery for model answers
//!
//! Models often wrap JSON in markdown fences or surround it with prose.
//! Recovery order: direct parse, fence removal, outermost object, outermost
//! array. Bare arrays are wrapped as `{"items": [...]}` so callers can always
//! index into an object.

use crate::adk::error::CapabilityError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\s*\n?").unwrap());
static OBJECT_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
static ARRAY_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

/// Parse a model answer into a JSON object, tolerating fences and prose
pub fn parse_lenient(text: &str) -> Result<Value, CapabilityError> {
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(wrap_array(value));
    }

    let cleaned = CODE_FENCE.replace_all(text, "");
    let cleaned = cleaned.trim();
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(wrap_array(value));
    }

    if let Some(m) = OBJECT_SPAN.find(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Ok(value);
        }
    }

    if let Some(m) = ARRAY_SPAN.find(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Ok(json!({ "items": value }));
        }
    }

    Err(CapabilityError::Parse(format!(
        "first 500 chars: {}",
        text.chars().take(500).collect::<String>()
    )))
}

fn wrap_array(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "items": other }),
    }
}
