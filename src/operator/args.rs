//! Typed access to validated tool arguments

use std::collections::BTreeMap;

use crate::mcp::{JsonValue, ToolError, ToolResult};

/// Read-only view over a call's argument object.
///
/// Absent or non-object arguments read as an empty object, matching how the
/// schema validator treats them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Args<'a> {
    object: Option<&'a BTreeMap<String, JsonValue>>,
}

impl<'a> Args<'a> {
    pub(crate) fn new(arguments: Option<&'a JsonValue>) -> Self {
        Self {
            object: arguments.and_then(JsonValue::as_object),
        }
    }

    fn get(&self, key: &str) -> Option<&'a JsonValue> {
        self.object.and_then(|object| object.get(key))
    }

    fn missing(key: &str) -> ToolError {
        ToolError::invalid_params(format!("{key} is required"))
    }

    pub(crate) fn str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(JsonValue::as_str)
    }

    pub(crate) fn required_str(&self, key: &str) -> ToolResult<&'a str> {
        self.str(key).ok_or_else(|| Self::missing(key))
    }

    pub(crate) fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(JsonValue::as_bool)
    }

    pub(crate) fn flag(&self, key: &str) -> bool {
        self.bool(key).unwrap_or(false)
    }

    pub(crate) fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(JsonValue::as_i64)
    }

    pub(crate) fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(JsonValue::as_f64)
    }

    pub(crate) fn required_f64(&self, key: &str) -> ToolResult<f64> {
        self.f64(key).ok_or_else(|| Self::missing(key))
    }

    pub(crate) fn required_strings(&self, key: &str) -> ToolResult<Vec<String>> {
        let items = self
            .get(key)
            .and_then(JsonValue::as_array)
            .ok_or_else(|| Self::missing(key))?;
        items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ToolError::invalid_params(format!("{key} must be an array of strings")))
    }

    /// Nested object view, `None` when the member is absent or not an object.
    pub(crate) fn object(&self, key: &str) -> Option<Args<'a>> {
        self.get(key)
            .filter(|value| value.as_object().is_some())
            .map(|value| Args::new(Some(value)))
    }

    /// `window_id` as a window number.
    pub(crate) fn window_id(&self) -> ToolResult<Option<u32>> {
        self.int("window_id")
            .map(|raw| {
                u32::try_from(raw).map_err(|_| {
                    ToolError::invalid_params("window_id must be a non-negative 32-bit integer")
                })
            })
            .transpose()
    }
}
