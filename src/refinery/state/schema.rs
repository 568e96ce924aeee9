// SPDX-License-Identifier: MIT

//! State schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema declaring how each workflow field is merged
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StateSchema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: HashMap<String, StateFieldDef>,
}

/// Definition of a single state field
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateFieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Reducer for merging values
    #[serde(default)]
    pub reducer: ReducerType,
    /// Default value
    pub default: Option<serde_json::Value>,
}

/// Supported field types
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Append objects whose value under the given key is not present yet
    AppendUnique(String),
    /// Keep maximum value
    Max,
    /// Keep minimum value
    Min,
    /// Shallow merge objects
    Merge,
}

impl ReducerType {
    /// Whether the field only ever grows
    pub fn is_accumulating(&self) -> bool {
        matches!(self, ReducerType::Append | ReducerType::AppendUnique(_))
    }
}

impl StateSchema {
    /// Start an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field (builder style)
    pub fn field(mut self, name: &str, field_type: FieldType, reducer: ReducerType) -> Self {
        let default = match field_type {
            FieldType::Array if reducer.is_accumulating() => Some(serde_json::json!([])),
            _ => None,
        };
        self.fields.insert(
            name.to_string(),
            StateFieldDef {
                field_type,
                reducer,
                default,
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_schema_deserialize() {
        let yaml = r#"
            report:
              type: object
            score:
              type: number
              reducer: max
            claims:
              type: array
              reducer: append
              default: []
        "#;
        let schema: StateSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields["report"].field_type, FieldType::Object);
        assert_eq!(schema.fields["report"].reducer, ReducerType::Overwrite);
        assert_eq!(schema.fields["score"].reducer, ReducerType::Max);
        assert_eq!(schema.fields["claims"].default, Some(json!([])));
    }

    #[test]
    fn test_append_unique_deserialize() {
        let schema: StateSchema = serde_json::from_value(json!({
            "sources": {"type": "array", "reducer": {"append_unique": "url"}}
        }))
        .unwrap();

        assert_eq!(
            schema.fields["sources"].reducer,
            ReducerType::AppendUnique("url".to_string())
        );
    }

    #[test]
    fn test_reducer_default() {
        let def = StateFieldDef {
            field_type: FieldType::String,
            reducer: ReducerType::default(),
            default: None,
        };
        assert_eq!(def.reducer, ReducerType::Overwrite);
    }

    #[test]
    fn test_builder_seeds_accumulating_arrays() {
        let schema = StateSchema::new()
            .field("sources", FieldType::Array, ReducerType::Append)
            .field("sub_queries", FieldType::Array, ReducerType::Overwrite);

        assert_eq!(schema.fields["sources"].default, Some(json!([])));
        assert_eq!(schema.fields["sub_queries"].default, None);
    }

    #[test]
    fn test_accumulating_reducers() {
        assert!(ReducerType::Append.is_accumulating());
        assert!(ReducerType::AppendUnique("url".into()).is_accumulating());
        assert!(!ReducerType::Overwrite.is_accumulating());
        assert!(!ReducerType::Merge.is_accumulating());
    }
}
