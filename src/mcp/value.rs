//! Dynamically shaped JSON value
//!
//! A closed tagged union used for protocol params, results and broker payloads.
//! Every conversion is explicit and total: parsing goes through serde's
//! visitor interface and access goes through the typed accessors below.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Largest magnitude at which every integer is exactly representable in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// JSON value with double-precision numbers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JsonValue {
    /// String
    String(String),
    /// Number (always double precision)
    Number(f64),
    /// Boolean
    Bool(bool),
    /// String-keyed mapping
    Object(BTreeMap<String, JsonValue>),
    /// Ordered sequence
    Array(Vec<JsonValue>),
    /// Null
    #[default]
    Null,
}

impl JsonValue {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, JsonValue)>,
    {
        JsonValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Empty object
    pub fn empty_object() -> Self {
        JsonValue::Object(BTreeMap::new())
    }

    /// Build an array of strings.
    pub fn string_array<S: AsRef<str>>(items: &[S]) -> Self {
        JsonValue::Array(items.iter().map(|s| JsonValue::from(s.as_ref())).collect())
    }

    /// Parse JSON text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode as compact JSON text.
    pub fn to_json_string(&self) -> String {
        // Serialization into a String cannot fail for this type.
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// Object contents
    pub fn as_object(&self) -> Option<&BTreeMap<String, JsonValue>> {
        match self {
            JsonValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Array contents
    pub fn as_array(&self) -> Option<&[JsonValue]> {
        match self {
            JsonValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// String contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean contents
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric contents
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsonValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric contents truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
            _ => None,
        }
    }

    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    /// Member lookup on an object; `None` for non-objects.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            JsonValue::String(_) => "string",
            JsonValue::Number(_) => "number",
            JsonValue::Bool(_) => "boolean",
            JsonValue::Object(_) => "object",
            JsonValue::Array(_) => "array",
            JsonValue::Null => "null",
        }
    }
}

impl From<&str> for JsonValue {
    fn from(value: &str) -> Self {
        JsonValue::String(value.to_string())
    }
}

impl From<String> for JsonValue {
    fn from(value: String) -> Self {
        JsonValue::String(value)
    }
}

impl From<f64> for JsonValue {
    fn from(value: f64) -> Self {
        JsonValue::Number(value)
    }
}

impl From<i64> for JsonValue {
    fn from(value: i64) -> Self {
        JsonValue::Number(value as f64)
    }
}

impl From<usize> for JsonValue {
    fn from(value: usize) -> Self {
        JsonValue::Number(value as f64)
    }
}

impl From<bool> for JsonValue {
    fn from(value: bool) -> Self {
        JsonValue::Bool(value)
    }
}

impl From<Vec<JsonValue>> for JsonValue {
    fn from(value: Vec<JsonValue>) -> Self {
        JsonValue::Array(value)
    }
}

impl<T: Into<JsonValue>> From<Option<T>> for JsonValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(JsonValue::Null)
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

impl Serialize for JsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonValue::String(s) => serializer.serialize_str(s),
            JsonValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            JsonValue::Bool(b) => serializer.serialize_bool(*b),
            JsonValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            JsonValue::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            JsonValue::Null => serializer.serialize_unit(),
        }
    }
}

struct JsonValueVisitor;

impl<'de> Visitor<'de> for JsonValueVisitor {
    type Value = JsonValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<JsonValue, E> {
        Ok(JsonValue::Bool(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<JsonValue, E> {
        Ok(JsonValue::Number(value as f64))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<JsonValue, E> {
        Ok(JsonValue::Number(value as f64))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<JsonValue, E> {
        Ok(JsonValue::Number(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<JsonValue, E> {
        Ok(JsonValue::String(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<JsonValue, E> {
        Ok(JsonValue::String(value))
    }

    fn visit_unit<E: de::Error>(self) -> Result<JsonValue, E> {
        Ok(JsonValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<JsonValue, E> {
        Ok(JsonValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<JsonValue, D::Error> {
        JsonValue::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JsonValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(JsonValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<JsonValue, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, JsonValue>()? {
            map.insert(key, value);
        }
        Ok(JsonValue::Object(map))
    }
}

impl<'de> Deserialize<'de> for JsonValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(JsonValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_variant() {
        let value = JsonValue::parse(r#"{"s":"x","n":1.5,"b":true,"a":[1,null],"o":{}}"#).unwrap();
        assert_eq!(value.get("s").and_then(JsonValue::as_str), Some("x"));
        assert_eq!(value.get("n").and_then(JsonValue::as_f64), Some(1.5));
        assert_eq!(value.get("b").and_then(JsonValue::as_bool), Some(true));
        let array = value.get("a").and_then(JsonValue::as_array).unwrap();
        assert_eq!(array.len(), 2);
        assert!(array[1].is_null());
        assert!(value.get("o").and_then(JsonValue::as_object).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_standard_json() {
        assert!(JsonValue::parse("{'single': 1}").is_err());
        assert!(JsonValue::parse("[1,]").is_err());
        assert!(JsonValue::parse("NaN").is_err());
        assert!(JsonValue::parse("").is_err());
    }

    #[test]
    fn null_members_survive_encoding() {
        let value = JsonValue::object([("token", JsonValue::Null)]);
        assert_eq!(value.to_json_string(), r#"{"token":null}"#);
    }

    #[test]
    fn whole_numbers_encode_without_fraction() {
        assert_eq!(JsonValue::from(3.0).to_json_string(), "3");
        assert_eq!(JsonValue::from(-2.5).to_json_string(), "-2.5");
    }

    #[test]
    fn integer_accessor_truncates() {
        assert_eq!(JsonValue::from(7.9).as_i64(), Some(7));
        assert_eq!(JsonValue::from("7").as_i64(), None);
    }
}
