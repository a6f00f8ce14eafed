//! Argument validation against a tool's declared input schema.
//!
//! Covers the subset of JSON Schema tool servers actually emit for function
//! arguments: a top-level object with typed properties, `required`,
//! `additionalProperties: false`, and `anyOf` / type arrays for optionals.
//! Anything richer is accepted without checking.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A primitive JSON type a property may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            "null" => Self::Null,
            _ => return None,
        })
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }
}

/// Allowed types for one property. Empty means unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
struct PropertyRule {
    types: Vec<JsonType>,
}

impl PropertyRule {
    fn compile(schema: &Value) -> Self {
        let mut types = Vec::new();
        collect_types(schema, &mut types);
        Self { types }
    }

    fn check(&self, value: &Value) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t.matches(value))
    }

    fn describe(&self) -> String {
        self.types
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Gather declared types from `type` (string or array) and `anyOf`/`oneOf`.
/// Any branch without a recognisable type makes the property unconstrained.
fn collect_types(schema: &Value, out: &mut Vec<JsonType>) {
    let before = out.len();
    match schema.get("type") {
        Some(Value::String(name)) => out.extend(JsonType::parse(name)),
        Some(Value::Array(names)) => out.extend(
            names
                .iter()
                .filter_map(Value::as_str)
                .filter_map(JsonType::parse),
        ),
        _ => {}
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = schema.get(key) {
            for branch in branches {
                let mut branch_types = Vec::new();
                collect_types(branch, &mut branch_types);
                if branch_types.is_empty() {
                    out.truncate(before);
                    return;
                }
                out.extend(branch_types);
            }
        }
    }
}

/// A tool's input schema, compiled once at discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSchema {
    properties: BTreeMap<String, PropertyRule>,
    required: Vec<String>,
    allow_additional: bool,
}

impl ArgumentSchema {
    /// Compile a schema. A missing or non-object schema accepts any object.
    pub fn compile(schema: &Value) -> Self {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, s)| (name.clone(), PropertyRule::compile(s)))
                    .collect()
            })
            .unwrap_or_default();

        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let allow_additional = !matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));

        Self {
            properties,
            required,
            allow_additional,
        }
    }

    /// Check `arguments`, returning a human-readable reason on mismatch.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let Some(args) = arguments.as_object() else {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                kind_of(arguments)
            ));
        };

        if let Some(missing) = self.required.iter().find(|name| !args.contains_key(*name)) {
            return Err(format!("missing required property '{missing}'"));
        }

        self.check_properties(args)
    }

    fn check_properties(&self, args: &Map<String, Value>) -> Result<(), String> {
        for (name, value) in args {
            match self.properties.get(name) {
                Some(rule) if !rule.check(value) => {
                    return Err(format!(
                        "property '{name}' must be {}, got {}",
                        rule.describe(),
                        kind_of(value)
                    ));
                }
                Some(_) => {}
                None if !self.allow_additional => {
                    return Err(format!("unexpected property '{name}'"));
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn isin_schema() -> ArgumentSchema {
        ArgumentSchema::compile(&json!({
            "type": "object",
            "properties": {
                "isin": {"type": "string"},
                "limit": {"type": "integer"},
                "region": {"anyOf": [{"type": "string"}, {"type": "null"}]}
            },
            "required": ["isin"],
            "additionalProperties": false
        }))
    }

    #[test]
    fn accepts_matching_arguments() {
        let schema = isin_schema();
        assert!(schema.validate(&json!({"isin": "US037833AS99"})).is_ok());
        assert!(schema.validate(&json!({"isin": "X", "limit": 5, "region": null})).is_ok());
        assert!(schema.validate(&json!({"isin": "X", "limit": 5.0})).is_ok());
    }

    #[test]
    fn rejects_non_object() {
        let err = isin_schema().validate(&json!("US037833AS99")).unwrap_err();
        assert!(err.contains("JSON object"));
    }

    #[test]
    fn rejects_missing_required() {
        let err = isin_schema().validate(&json!({"limit": 1})).unwrap_err();
        assert_eq!(err, "missing required property 'isin'");
    }

    #[test]
    fn rejects_wrong_type() {
        let err = isin_schema().validate(&json!({"isin": 42})).unwrap_err();
        assert!(err.contains("'isin' must be string"));

        let err = isin_schema()
            .validate(&json!({"isin": "X", "limit": 2.5}))
            .unwrap_err();
        assert!(err.contains("integer"));
    }

    #[test]
    fn rejects_unexpected_property_when_closed() {
        let err = isin_schema()
            .validate(&json!({"isin": "X", "cusip": "037833AS9"}))
            .unwrap_err();
        assert_eq!(err, "unexpected property 'cusip'");
    }

    #[test]
    fn open_schema_allows_extras() {
        let schema = ArgumentSchema::compile(&json!({
            "type": "object",
            "properties": {"name": {"type": "string"}}
        }));
        assert!(schema.validate(&json!({"name": "Apple", "extra": true})).is_ok());
    }

    #[test]
    fn missing_schema_accepts_any_object() {
        let schema = ArgumentSchema::compile(&Value::Null);
        assert!(schema.validate(&json!({"anything": [1, 2]})).is_ok());
        assert!(schema.validate(&json!([1])).is_err());
    }

    #[test]
    fn untyped_branch_leaves_property_unconstrained() {
        let schema = ArgumentSchema::compile(&json!({
            "properties": {"filter": {"anyOf": [{"type": "string"}, {"$ref": "#/defs/Filter"}]}}
        }));
        assert!(schema.validate(&json!({"filter": {"sector": "tech"}})).is_ok());
    }
}
