// SPDX-License-Identifier: MIT

//! Runtime state threaded through every stage and iteration

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use super::schema::{ReducerType, StateSchema};
use crate::refinery::usage::UsageLedger;

/// Engine phase recorded on the state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Running,
    Refining,
    Accepted,
    Failed,
}

/// Workflow state with reducer-driven field merging
///
/// Stages only ever see `&WorkflowState`; all mutation goes through
/// [`StageUpdate`](crate::refinery::stage::StageUpdate) or the engine.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    run_id: Uuid,
    query: String,
    fields: BTreeMap<String, Value>,
    #[serde(skip)]
    reducers: HashMap<String, ReducerType>,
    iteration: u32,
    max_iterations: u32,
    score: f64,
    errors: Vec<String>,
    phase: Phase,
    status: String,
    usage: UsageLedger,
}

impl WorkflowState {
    /// Create a fresh state for one run; `max_iterations` is clamped to at least 1
    pub fn new(query: impl Into<String>, max_iterations: u32, schema: &StateSchema) -> Self {
        let mut fields = BTreeMap::new();
        let mut reducers = HashMap::new();

        for (name, def) in &schema.fields {
            if let Some(default) = &def.default {
                fields.insert(name.clone(), default.clone());
            }
            reducers.insert(name.clone(), def.reducer.clone());
        }

        Self {
            run_id: Uuid::new_v4(),
            query: query.into(),
            fields,
            reducers,
            iteration: 0,
            max_iterations: max_iterations.max(1),
            score: 0.0,
            errors: Vec::new(),
            phase: Phase::Running,
            status: "Starting".to_string(),
            usage: UsageLedger::default(),
        }
    }

    /// Create a state with no declared fields
    pub fn empty(query: impl Into<String>, max_iterations: u32) -> Self {
        Self::new(query, max_iterations, &StateSchema::default())
    }

    /// Update a field using the appropriate reducer
    pub(crate) fn update(&mut self, key: &str, value: Value) {
        let reducer = self
            .reducers
            .get(key)
            .cloned()
            .unwrap_or(ReducerType::Overwrite);

        match reducer {
            ReducerType::Overwrite => {
                self.fields.insert(key.to_string(), value);
            }
            ReducerType::Append => self.append(key, value),
            ReducerType::AppendUnique(unique_key) => {
                let arr = self.array_entry(key);
                let mut seen: HashSet<String> = arr
                    .iter()
                    .filter_map(|item| item.get(&unique_key).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();

                let items = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                for item in items {
                    match item.get(&unique_key).and_then(Value::as_str) {
                        Some(id) if !seen.insert(id.to_string()) => {}
                        _ => arr.push(item),
                    }
                }
            }
            ReducerType::Max => {
                if let Some(new) = value.as_f64() {
                    let current = self.fields.get(key).and_then(Value::as_f64);
                    if current.map_or(true, |c| new > c) {
                        self.fields.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Min => {
                if let Some(new) = value.as_f64() {
                    let current = self.fields.get(key).and_then(Value::as_f64);
                    if current.map_or(true, |c| new < c) {
                        self.fields.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Merge => {
                let current = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                match (current, value) {
                    (Value::Object(current_obj), Value::Object(new_obj)) => {
                        current_obj.extend(new_obj);
                    }
                    (current, value) => *current = value,
                }
            }
        }
    }

    /// Append to an array field regardless of its reducer
    pub(crate) fn append(&mut self, key: &str, value: Value) {
        let arr = self.array_entry(key);
        match value {
            Value::Array(new_items) => arr.extend(new_items),
            other => arr.push(other),
        }
    }

    fn array_entry(&mut self, key: &str) -> &mut Vec<Value> {
        let entry = self
            .fields
            .entry(key.to_string())
            .or_insert(Value::Array(vec![]));
        if !entry.is_array() {
            let previous = std::mem::take(entry);
            *entry = Value::Array(if previous.is_null() { vec![] } else { vec![previous] });
        }
        match entry {
            Value::Array(a) => a,
            _ => unreachable!("entry was just normalized to an array"),
        }
    }

    pub(crate) fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    pub(crate) fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub(crate) fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn advance_iteration(&mut self) {
        self.iteration += 1;
    }

    pub(crate) fn usage_mut(&mut self) -> &mut UsageLedger {
        &mut self.usage
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Completed refinement passes
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a nested field value using dot notation (e.g., "report.follow_up_queries")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Array field as a slice; missing or non-array fields read as empty
    pub fn get_array(&self, key: &str) -> &[Value] {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of items in an array field
    pub fn len_of(&self, key: &str) -> usize {
        self.get_array(key).len()
    }

    /// Convert the whole state, metadata included, to JSON
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinery::state::schema::FieldType;
    use serde_json::json;

    fn make_state(fields: Vec<(&str, FieldType, ReducerType)>) -> WorkflowState {
        let mut schema = StateSchema::new();
        for (name, field_type, reducer) in fields {
            schema = schema.field(name, field_type, reducer);
        }
        WorkflowState::new("impact of AI on healthcare", 3, &schema)
    }

    #[test]
    fn test_new_state() {
        let state = WorkflowState::empty("q", 0);
        assert_eq!(state.query(), "q");
        assert_eq!(state.iteration(), 0);
        assert_eq!(state.max_iterations(), 1);
        assert_eq!(state.phase(), Phase::Running);
        assert!(state.errors().is_empty());
        assert!(state.get("anything").is_none());
    }

    #[test]
    fn test_overwrite_reducer() {
        let mut state = make_state(vec![("report", FieldType::Object, ReducerType::Overwrite)]);

        state.update("report", json!({"title": "first"}));
        state.update("report", json!({"title": "second"}));
        assert_eq!(state.get_path("report.title"), Some(&json!("second")));
    }

    #[test]
    fn test_append_reducer() {
        let mut state = make_state(vec![("claims", FieldType::Array, ReducerType::Append)]);
        assert_eq!(state.get("claims"), Some(&json!([])));

        state.update("claims", json!("c1"));
        state.update("claims", json!(["c2", "c3"]));
        assert_eq!(state.get("claims"), Some(&json!(["c1", "c2", "c3"])));
    }

    #[test]
    fn test_append_unique_reducer() {
        let mut state = make_state(vec![(
            "sources",
            FieldType::Array,
            ReducerType::AppendUnique("url".to_string()),
        )]);

        state.update(
            "sources",
            json!([{"url": "https://a"}, {"url": "https://b"}, {"url": "https://a"}]),
        );
        state.update("sources", json!([{"url": "https://b"}, {"url": "https://c"}]));
        state.update("sources", json!({"title": "no url"}));

        let urls: Vec<_> = state
            .get_array("sources")
            .iter()
            .map(|s| s.get("url").and_then(Value::as_str).unwrap_or("-"))
            .collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c", "-"]);
    }

    #[test]
    fn test_max_and_min_reducers() {
        let mut state = make_state(vec![
            ("best", FieldType::Number, ReducerType::Max),
            ("cost", FieldType::Number, ReducerType::Min),
        ]);

        for v in [5.0, 3.0, 8.0] {
            state.update("best", json!(v));
            state.update("cost", json!(v));
        }
        assert_eq!(state.get("best"), Some(&json!(8.0)));
        assert_eq!(state.get("cost"), Some(&json!(3.0)));
    }

    #[test]
    fn test_merge_reducer() {
        let mut state = make_state(vec![("meta", FieldType::Object, ReducerType::Merge)]);

        state.update("meta", json!({"a": 1}));
        state.update("meta", json!({"b": 2}));
        state.update("meta", json!({"a": 10}));
        assert_eq!(state.get("meta"), Some(&json!({"a": 10, "b": 2})));
    }

    #[test]
    fn test_append_wraps_existing_scalar() {
        let mut state = WorkflowState::empty("q", 1);
        state.update("notes", json!("first"));
        state.append("notes", json!("second"));
        assert_eq!(state.get("notes"), Some(&json!(["first", "second"])));
    }

    #[test]
    fn test_undefined_field_uses_overwrite() {
        let mut state = WorkflowState::empty("q", 1);
        state.update("unknown", json!("first"));
        state.update("unknown", json!("second"));
        assert_eq!(state.get("unknown"), Some(&json!("second")));
    }

    #[test]
    fn test_get_array_and_len() {
        let mut state = WorkflowState::empty("q", 1);
        state.update("sub_queries", json!(["a", "b"]));
        state.update("report", json!({}));

        assert_eq!(state.len_of("sub_queries"), 2);
        assert_eq!(state.len_of("report"), 0);
        assert_eq!(state.len_of("missing"), 0);
    }

    #[test]
    fn test_to_json_includes_metadata() {
        let mut state = WorkflowState::empty("q", 2);
        state.update("a", json!(1));
        state.push_error("Decomposer: boom");

        let json = state.to_json();
        assert_eq!(json["query"], "q");
        assert_eq!(json["fields"]["a"], 1);
        assert_eq!(json["max_iterations"], 2);
        assert_eq!(json["phase"], "running");
        assert_eq!(json["errors"][0], "Decomposer: boom");
        assert!(json.get("reducers").is_none());
    }
}
