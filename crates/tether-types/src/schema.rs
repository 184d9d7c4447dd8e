//! Translation of JSON-Schema-like tool input definitions into runtime validators.
//!
//! Providers describe tool parameters with a loose subset of JSON Schema. The
//! translation here is total: anything it does not understand becomes
//! [`Schema::Any`] so that an odd schema never makes a tool unusable.

use serde_json::{Map, Value};
use thiserror::Error;

/// A translated parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Accepts every value, including `null`.
    Any,
    String,
    Number,
    /// A number with no fractional part, optionally bounded below (inclusive).
    Integer { minimum: Option<f64> },
    Boolean,
    /// An array whose elements all match the inner schema.
    Array(Box<Schema>),
    /// An object with declared properties. Undeclared keys are allowed.
    Object(Vec<Property>),
}

/// A declared property of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
    pub description: Option<String>,
}

/// The first place a value failed to match a schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    /// JSON path of the offending value, rooted at `$`.
    pub path: String,
    pub message: String,
}

impl Schema {
    /// Translate a JSON-Schema-like node.
    ///
    /// A node without a string `type`, or with a type outside the supported
    /// set, translates to [`Schema::Any`].
    pub fn from_json(node: &Value) -> Schema {
        let Some(ty) = node.get("type").and_then(Value::as_str) else {
            tracing::debug!("schema node has no type, accepting any value");
            return Schema::Any;
        };

        match ty {
            "string" => Schema::String,
            "number" => Schema::Number,
            "boolean" => Schema::Boolean,
            "integer" => Schema::Integer {
                minimum: node.get("minimum").and_then(Value::as_f64),
            },
            "array" => {
                let items = node.get("items").map_or(Schema::Any, Schema::from_json);
                Schema::Array(Box::new(items))
            }
            "object" => Schema::Object(object_properties(node)),
            other => {
                tracing::debug!(schema_type = other, "unsupported schema type, accepting any value");
                Schema::Any
            }
        }
    }

    /// Translate an optional schema; a missing schema accepts anything.
    pub fn from_optional(node: Option<&Value>) -> Schema {
        node.map_or(Schema::Any, Schema::from_json)
    }

    /// Check a value against this schema.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.check(value, "$")
    }

    /// Re-emit this schema as normalized JSON Schema.
    ///
    /// Object schemas always carry an explicit `required` list, so translating
    /// the output again yields an equal schema.
    pub fn to_json(&self) -> Value {
        match self {
            Schema::Any => Value::Object(Map::new()),
            Schema::String => serde_json::json!({"type": "string"}),
            Schema::Number => serde_json::json!({"type": "number"}),
            Schema::Boolean => serde_json::json!({"type": "boolean"}),
            Schema::Integer { minimum } => {
                let mut node = serde_json::json!({"type": "integer"});
                if let Some(min) = minimum {
                    node["minimum"] = serde_json::json!(min);
                }
                node
            }
            Schema::Array(items) => serde_json::json!({
                "type": "array",
                "items": items.to_json(),
            }),
            Schema::Object(props) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for prop in props {
                    let mut node = prop.schema.to_json();
                    if let (Some(desc), Value::Object(map)) = (&prop.description, &mut node) {
                        map.insert("description".into(), Value::String(desc.clone()));
                    }
                    properties.insert(prop.name.clone(), node);
                    if prop.required {
                        required.push(Value::String(prop.name.clone()));
                    }
                }
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }

    /// Short name of the expected kind, used in violation messages.
    fn kind(&self) -> &'static str {
        match self {
            Schema::Any => "any value",
            Schema::String => "string",
            Schema::Number => "number",
            Schema::Integer { .. } => "integer",
            Schema::Boolean => "boolean",
            Schema::Array(_) => "array",
            Schema::Object(_) => "object",
        }
    }

    fn check(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
        match (self, value) {
            (Schema::Any, _) => Ok(()),
            (Schema::String, Value::String(_)) => Ok(()),
            (Schema::Number, Value::Number(_)) => Ok(()),
            (Schema::Boolean, Value::Bool(_)) => Ok(()),
            (Schema::Integer { minimum }, Value::Number(n)) => {
                let as_float = n.as_f64().unwrap_or(f64::NAN);
                if !(n.is_i64() || n.is_u64() || as_float.fract() == 0.0) {
                    return Err(violation(path, format!("expected integer, got {n}")));
                }
                match minimum {
                    Some(min) if as_float < *min => Err(violation(
                        path,
                        format!("{n} is less than the minimum of {min}"),
                    )),
                    _ => Ok(()),
                }
            }
            (Schema::Array(items), Value::Array(elements)) => {
                for (i, element) in elements.iter().enumerate() {
                    items.check(element, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            (Schema::Object(props), Value::Object(map)) => {
                for prop in props {
                    let child = format!("{path}.{}", prop.name);
                    match map.get(&prop.name) {
                        Some(v) => prop.schema.check(v, &child)?,
                        None if prop.required => {
                            return Err(violation(&child, "required property is missing"));
                        }
                        None => {}
                    }
                }
                Ok(())
            }
            (expected, actual) => Err(violation(
                path,
                format!("expected {}, got {}", expected.kind(), json_kind(actual)),
            )),
        }
    }
}

/// Collect declared properties. Only names in the `required` list are
/// required; without the list every declared property is optional.
fn object_properties(node: &Value) -> Vec<Property> {
    let Some(props) = node.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Option<Vec<&str>> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect());

    props
        .iter()
        .map(|(name, sub)| Property {
            name: name.clone(),
            schema: Schema::from_json(sub),
            required: required
                .as_ref()
                .is_some_and(|names| names.contains(&name.as_str())),
            description: sub
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect()
}

fn violation(path: &str, message: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn json_kind(value: &Value) -> &'static str {
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

    #[test]
    fn required_property_must_be_present() {
        let schema = Schema::from_json(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["a"]
        }));
        assert!(schema.validate(&json!({"a": "x"})).is_ok());
        let err = schema.validate(&json!({})).unwrap_err();
        assert_eq!(err.path, "$.a");
    }

    #[test]
    fn omitted_required_list_makes_all_optional() {
        let schema = Schema::from_json(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}}
        }));
        match &schema {
            Schema::Object(props) => assert!(!props[0].required),
            other => panic!("Expected object schema, got {other:?}"),
        }
        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({"a": "x"})).is_ok());
        let err = schema.validate(&json!({"a": 1})).unwrap_err();
        assert_eq!(err.path, "$.a");
    }

    #[test]
    fn property_outside_required_list_is_optional() {
        let schema = Schema::from_json(&json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["path"]
        }));
        assert!(schema.validate(&json!({"path": "/tmp"})).is_ok());
        assert!(schema.validate(&json!({"path": "/tmp", "limit": 3})).is_ok());
        let err = schema
            .validate(&json!({"path": "/tmp", "limit": "three"}))
            .unwrap_err();
        assert_eq!(err.path, "$.limit");
    }

    #[test]
    fn empty_required_list_makes_everything_optional() {
        let schema = Schema::from_json(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": []
        }));
        assert!(schema.validate(&json!({})).is_ok());
    }

    #[test]
    fn missing_or_unknown_type_accepts_anything() {
        assert_eq!(Schema::from_json(&json!({})), Schema::Any);
        assert_eq!(Schema::from_json(&json!({"type": "null"})), Schema::Any);
        assert_eq!(Schema::from_json(&json!({"type": ["string", "null"]})), Schema::Any);
        assert_eq!(Schema::from_optional(None), Schema::Any);
        assert!(Schema::Any.validate(&Value::Null).is_ok());
        assert!(Schema::Any.validate(&json!([1, "two"])).is_ok());
    }

    #[test]
    fn scalar_types() {
        let s = Schema::from_json(&json!({"type": "string"}));
        assert!(s.validate(&json!("hi")).is_ok());
        assert!(s.validate(&json!(1)).is_err());

        let n = Schema::from_json(&json!({"type": "number"}));
        assert!(n.validate(&json!(1.5)).is_ok());
        assert!(n.validate(&json!("1.5")).is_err());

        let b = Schema::from_json(&json!({"type": "boolean"}));
        assert!(b.validate(&json!(false)).is_ok());
        let err = b.validate(&Value::Null).unwrap_err();
        assert_eq!(err.message, "expected boolean, got null");
    }

    #[test]
    fn integer_rejects_fractions_and_respects_minimum() {
        let schema = Schema::from_json(&json!({"type": "integer", "minimum": 1}));
        assert_eq!(schema, Schema::Integer { minimum: Some(1.0) });
        assert!(schema.validate(&json!(1)).is_ok());
        assert!(schema.validate(&json!(2.0)).is_ok());
        assert!(schema.validate(&json!(0)).is_err());
        assert!(schema.validate(&json!(1.5)).is_err());

        let unbounded = Schema::from_json(&json!({"type": "integer"}));
        assert!(unbounded.validate(&json!(-40)).is_ok());
    }

    #[test]
    fn array_items_are_checked_with_index_paths() {
        let schema = Schema::from_json(&json!({
            "type": "array",
            "items": {"type": "integer"}
        }));
        assert!(schema.validate(&json!([1, 2, 3])).is_ok());
        let err = schema.validate(&json!([1, 2, "x"])).unwrap_err();
        assert_eq!(err.path, "$[2]");

        let untyped = Schema::from_json(&json!({"type": "array"}));
        assert_eq!(untyped, Schema::Array(Box::new(Schema::Any)));
        assert!(untyped.validate(&json!([null, {}, 1])).is_ok());
    }

    #[test]
    fn nested_objects_recurse() {
        let schema = Schema::from_json(&json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {"tags": {"type": "array", "items": {"type": "string"}}},
                    "required": ["tags"]
                }
            },
            "required": ["filter"]
        }));
        assert!(schema.validate(&json!({"filter": {"tags": ["a"]}})).is_ok());
        let err = schema
            .validate(&json!({"filter": {"tags": ["a", 7]}}))
            .unwrap_err();
        assert_eq!(err.path, "$.filter.tags[1]");
        assert_eq!(err.to_string(), "$.filter.tags[1]: expected string, got number");
    }

    #[test]
    fn undeclared_keys_are_allowed() {
        let schema = Schema::from_json(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}}
        }));
        assert!(schema.validate(&json!({"a": "x", "extra": 1})).is_ok());
    }

    #[test]
    fn normalized_json_keeps_required_semantics() {
        let original = Schema::from_json(&json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search terms"},
                "page": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        }));
        let emitted = original.to_json();
        assert_eq!(emitted["required"], json!(["query"]));
        assert_eq!(emitted["properties"]["query"]["description"], "Search terms");
        assert_eq!(Schema::from_json(&emitted), original);

        let all_optional = Schema::from_json(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}}
        }));
        let emitted = all_optional.to_json();
        assert_eq!(emitted["required"], json!([]));
        assert_eq!(Schema::from_json(&emitted), all_optional);
    }

    #[test]
    fn normalized_json_describes_properties() {
        let original = Schema::from_json(&json!({
            "type": "object",
            "properties": {"query": {"type": "string", "description": "Search terms"}}
        }));
        let emitted = original.to_json();
        assert_eq!(emitted["properties"]["query"]["description"], "Search terms");
        assert_eq!(Schema::from_json(&emitted), original);
    }
}
