//! Declarative tool input shapes and recursive validation
//!
//! Objects are closed: any field not declared in a shape is a violation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::value::JsonValue;

/// Scalar type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    /// JSON object
    Object,
    /// JSON string
    String,
    /// Any JSON number
    Number,
    /// JSON number with zero fractional part
    Integer,
    /// JSON boolean
    Boolean,
    /// JSON array
    Array,
}

impl SchemaType {
    /// JSON Schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
        }
    }

    fn matches(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (SchemaType::String, JsonValue::String(_)) => true,
            (SchemaType::Number, JsonValue::Number(_)) => true,
            (SchemaType::Integer, JsonValue::Number(n)) => n.floor() == *n,
            (SchemaType::Boolean, JsonValue::Bool(_)) => true,
            (SchemaType::Array, JsonValue::Array(_)) => true,
            (SchemaType::Object, JsonValue::Object(_)) => true,
            _ => false,
        }
    }
}

/// Shape of a single property.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaProperty {
    /// Scalar of the given type
    Scalar(SchemaType),
    /// String restricted to the listed values
    EnumString(Vec<String>),
    /// Array whose items all match the inner shape
    Array(Box<SchemaProperty>),
    /// Closed nested object
    Object {
        /// Required member names
        required: BTreeSet<String>,
        /// Declared members
        properties: BTreeMap<String, SchemaProperty>,
    },
    /// Inner shape or null
    Nullable(Box<SchemaProperty>),
}

impl SchemaProperty {
    /// `string` scalar
    pub fn string() -> Self {
        SchemaProperty::Scalar(SchemaType::String)
    }

    /// `number` scalar
    pub fn number() -> Self {
        SchemaProperty::Scalar(SchemaType::Number)
    }

    /// `integer` scalar
    pub fn integer() -> Self {
        SchemaProperty::Scalar(SchemaType::Integer)
    }

    /// `boolean` scalar
    pub fn boolean() -> Self {
        SchemaProperty::Scalar(SchemaType::Boolean)
    }

    /// String enumeration
    pub fn one_of(values: &[&str]) -> Self {
        SchemaProperty::EnumString(values.iter().map(|v| v.to_string()).collect())
    }

    /// Array of `item`
    pub fn array_of(item: SchemaProperty) -> Self {
        SchemaProperty::Array(Box::new(item))
    }

    /// Closed object
    pub fn object<I, K>(required: &[&str], properties: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaProperty)>,
        K: Into<String>,
    {
        SchemaProperty::Object {
            required: required.iter().map(|r| r.to_string()).collect(),
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// `self` or null
    pub fn nullable(self) -> Self {
        SchemaProperty::Nullable(Box::new(self))
    }

    /// Structural match, recursive.
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            SchemaProperty::Scalar(kind) => kind.matches(value),
            SchemaProperty::EnumString(values) => value
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
            SchemaProperty::Array(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| item.matches(v))),
            SchemaProperty::Object {
                required,
                properties,
            } => {
                let Some(object) = value.as_object() else {
                    return false;
                };
                required.iter().all(|key| object.contains_key(key))
                    && object.iter().all(|(key, member)| {
                        properties
                            .get(key)
                            .is_some_and(|shape| shape.matches(member))
                    })
            }
            SchemaProperty::Nullable(inner) => value.is_null() || inner.matches(value),
        }
    }

    /// JSON Schema rendering
    pub fn to_value(&self) -> JsonValue {
        match self {
            SchemaProperty::Scalar(kind) => JsonValue::object([("type", JsonValue::from(kind.as_str()))]),
            SchemaProperty::EnumString(values) => JsonValue::object([
                ("type", JsonValue::from("string")),
                ("enum", JsonValue::string_array(values)),
            ]),
            SchemaProperty::Array(item) => JsonValue::object([
                ("type", JsonValue::from("array")),
                ("items", item.to_value()),
            ]),
            SchemaProperty::Object {
                required,
                properties,
            } => object_schema_value("object", required, properties),
            SchemaProperty::Nullable(inner) => JsonValue::object([(
                "anyOf",
                JsonValue::Array(vec![
                    inner.to_value(),
                    JsonValue::object([("type", JsonValue::from("null"))]),
                ]),
            )]),
        }
    }
}

impl fmt::Display for SchemaProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaProperty::Scalar(kind) => f.write_str(kind.as_str()),
            SchemaProperty::EnumString(values) => write!(f, "one of [{}]", values.join(", ")),
            SchemaProperty::Array(item) => write!(f, "array of {item}"),
            SchemaProperty::Object { .. } => f.write_str("object"),
            SchemaProperty::Nullable(inner) => write!(f, "{inner} or null"),
        }
    }
}

/// Top-level input shape of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    /// Root type, always object for tools
    pub schema_type: SchemaType,
    /// Required member names
    pub required: BTreeSet<String>,
    /// Declared members
    pub properties: BTreeMap<String, SchemaProperty>,
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSchema {
    /// Empty object schema
    pub fn new() -> Self {
        Self {
            schema_type: SchemaType::Object,
            required: BTreeSet::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Declare required members
    pub fn required(mut self, names: &[&str]) -> Self {
        self.required.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Declare a member
    pub fn property(mut self, name: &str, shape: SchemaProperty) -> Self {
        self.properties.insert(name.to_string(), shape);
        self
    }

    /// Validate arguments and return every violation found.
    ///
    /// Absent or non-object arguments are treated as an empty object. An empty
    /// result is the only success signal.
    pub fn validate(&self, arguments: Option<&JsonValue>) -> Vec<String> {
        let empty = BTreeMap::new();
        let object = arguments.and_then(JsonValue::as_object).unwrap_or(&empty);
        let mut violations = Vec::new();

        for key in &self.required {
            if !object.contains_key(key) {
                violations.push(format!("missing required field: {key}"));
            }
        }

        for key in object.keys() {
            if !self.properties.contains_key(key) {
                violations.push(format!("unknown field: {key}"));
            }
        }

        for (key, shape) in &self.properties {
            if let Some(value) = object.get(key) {
                if !shape.matches(value) {
                    violations.push(format!("field '{key}' expected {shape}"));
                }
            }
        }

        violations
    }

    /// JSON Schema rendering with `additionalProperties: false`.
    pub fn to_value(&self) -> JsonValue {
        object_schema_value(self.schema_type.as_str(), &self.required, &self.properties)
    }
}

fn object_schema_value(
    type_name: &str,
    required: &BTreeSet<String>,
    properties: &BTreeMap<String, SchemaProperty>,
) -> JsonValue {
    let rendered = properties
        .iter()
        .map(|(k, v)| (k.clone(), v.to_value()))
        .collect();
    JsonValue::object([
        ("type", JsonValue::from(type_name)),
        (
            "required",
            JsonValue::Array(required.iter().map(|r| JsonValue::from(r.as_str())).collect()),
        ),
        ("properties", JsonValue::Object(rendered)),
        ("additionalProperties", JsonValue::Bool(false)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_schema() -> ToolSchema {
        ToolSchema::new()
            .required(&["x", "y"])
            .property("x", SchemaProperty::number())
            .property("y", SchemaProperty::number())
            .property("click_count", SchemaProperty::integer())
            .property("button", SchemaProperty::one_of(&["left", "right", "center"]))
    }

    fn args(text: &str) -> JsonValue {
        JsonValue::parse(text).unwrap()
    }

    #[test]
    fn accepts_conforming_arguments() {
        let schema = click_schema();
        assert!(schema.validate(Some(&args(r#"{"x":1,"y":2.5,"button":"right"}"#))).is_empty());
    }

    #[test]
    fn reports_missing_and_unknown_fields() {
        let schema = click_schema();
        let violations = schema.validate(Some(&args(r#"{"x":1,"z":3}"#)));
        assert_eq!(
            violations,
            vec!["missing required field: y".to_string(), "unknown field: z".to_string()]
        );
    }

    #[test]
    fn integer_requires_whole_number() {
        let schema = click_schema();
        let violations = schema.validate(Some(&args(r#"{"x":1,"y":2,"click_count":1.5}"#)));
        assert_eq!(violations, vec!["field 'click_count' expected integer".to_string()]);
    }

    #[test]
    fn enum_description_lists_values() {
        let schema = click_schema();
        let violations = schema.validate(Some(&args(r#"{"x":1,"y":2,"button":"middle"}"#)));
        assert_eq!(
            violations,
            vec!["field 'button' expected one of [left, right, center]".to_string()]
        );
    }

    #[test]
    fn nested_objects_are_closed() {
        let schema = ToolSchema::new().property(
            "region",
            SchemaProperty::object(
                &["x"],
                [("x", SchemaProperty::number()), ("y", SchemaProperty::number())],
            ),
        );
        assert!(schema.validate(Some(&args(r#"{"region":{"x":1}}"#))).is_empty());
        assert_eq!(
            schema.validate(Some(&args(r#"{"region":{"x":1,"extra":true}}"#))),
            vec!["field 'region' expected object".to_string()]
        );
        assert_eq!(
            schema.validate(Some(&args(r#"{"region":{"y":1}}"#))),
            vec!["field 'region' expected object".to_string()]
        );
    }

    #[test]
    fn arrays_and_nullables_recurse() {
        let schema = ToolSchema::new()
            .property("keys", SchemaProperty::array_of(SchemaProperty::string()))
            .property("note", SchemaProperty::string().nullable());
        assert!(schema.validate(Some(&args(r#"{"keys":["cmd","q"],"note":null}"#))).is_empty());
        assert_eq!(
            schema.validate(Some(&args(r#"{"keys":["cmd",1],"note":3}"#))),
            vec![
                "field 'keys' expected array of string".to_string(),
                "field 'note' expected string or null".to_string(),
            ]
        );
    }

    #[test]
    fn missing_arguments_behave_like_empty_object() {
        let schema = click_schema();
        assert_eq!(schema.validate(None).len(), 2);
        assert!(ToolSchema::new().validate(None).is_empty());
    }

    #[test]
    fn renders_closed_json_schema() {
        let value = click_schema()
            .property("note", SchemaProperty::string().nullable())
            .to_value();
        assert_eq!(value.get("type").and_then(JsonValue::as_str), Some("object"));
        assert_eq!(value.get("additionalProperties"), Some(&JsonValue::Bool(false)));
        let required = value.get("required").and_then(JsonValue::as_array).unwrap();
        assert_eq!(required, &[JsonValue::from("x"), JsonValue::from("y")]);
        let button = value.get("properties").and_then(|p| p.get("button")).unwrap();
        assert_eq!(button.get("enum").and_then(JsonValue::as_array).map(|a| a.len()), Some(3));
        let note = value.get("properties").and_then(|p| p.get("note")).unwrap();
        assert_eq!(note.get("anyOf").and_then(JsonValue::as_array).map(|a| a.len()), Some(2));
    }
}
