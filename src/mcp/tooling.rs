//! Tool catalog entries, call results and the executor seam

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::ToolResult;
use super::schema::ToolSchema;
use super::value::JsonValue;

/// Temp subdirectory for materialized images
pub const IMAGE_DIR_NAME: &str = "macos-mcp-operator-images";

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human description
    pub description: String,
    /// Input shape
    pub input_schema: ToolSchema,
}

impl ToolDefinition {
    /// Create a catalog entry
    pub fn new(name: &str, description: &str, input_schema: ToolSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }

    /// `tools/list` rendering
    pub fn to_value(&self) -> JsonValue {
        JsonValue::object([
            ("name", JsonValue::from(self.name.as_str())),
            ("description", JsonValue::from(self.description.as_str())),
            ("inputSchema", self.input_schema.to_value()),
        ])
    }
}

/// How image payloads are delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageDeliveryMode {
    /// Inline base64 image content block
    #[default]
    InlineBase64,
    /// Write a temp file and reference its path
    FilePath,
    /// Inline block plus a temp file
    Both,
}

/// Encoded image attached to a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolImage {
    /// Base64 payload
    pub base64: String,
    /// `image/png` or `image/jpeg`
    pub mime_type: String,
}

/// Result of a successful `tools/call` dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    /// Machine-readable payload
    pub structured_content: JsonValue,
    /// Human-readable summary
    pub text: String,
    /// Whether the tool reports failure
    pub is_error: bool,
    /// Optional image
    pub image: Option<ToolImage>,
}

impl ToolCallResult {
    /// Successful result
    pub fn ok(structured_content: JsonValue, text: impl Into<String>) -> Self {
        Self {
            structured_content,
            text: text.into(),
            is_error: false,
            image: None,
        }
    }

    /// Result that reports failure without being a protocol error
    pub fn error(structured_content: JsonValue, text: impl Into<String>) -> Self {
        Self {
            structured_content,
            text: text.into(),
            is_error: true,
            image: None,
        }
    }

    /// Attach an image
    pub fn with_image(mut self, base64: String, mime_type: &str) -> Self {
        self.image = Some(ToolImage {
            base64,
            mime_type: mime_type.to_string(),
        });
        self
    }

    /// Render as the `tools/call` result payload.
    pub fn to_value(&self, mode: ImageDeliveryMode) -> JsonValue {
        let mut content = Vec::new();
        let mut structured = self.structured_content.clone();

        if let Some(image) = &self.image {
            let inline = matches!(mode, ImageDeliveryMode::InlineBase64 | ImageDeliveryMode::Both);
            if inline {
                content.push(inline_image_block(image));
            }
            if matches!(mode, ImageDeliveryMode::FilePath | ImageDeliveryMode::Both) {
                match materialize_image(image) {
                    Some(path) => {
                        let path = path.display().to_string();
                        structured = merge_image_path(structured, &path, &image.mime_type);
                        content.push(text_block(format!("Image saved to {path}")));
                    }
                    None if !inline => content.push(inline_image_block(image)),
                    None => {}
                }
            }
        }

        content.push(text_block(self.text.clone()));

        JsonValue::object([
            ("content", JsonValue::Array(content)),
            ("isError", JsonValue::Bool(self.is_error)),
            ("structuredContent", structured),
        ])
    }
}

fn inline_image_block(image: &ToolImage) -> JsonValue {
    JsonValue::object([
        ("type", JsonValue::from("image")),
        ("data", JsonValue::from(image.base64.as_str())),
        ("mimeType", JsonValue::from(image.mime_type.as_str())),
    ])
}

fn text_block(text: String) -> JsonValue {
    JsonValue::object([("type", JsonValue::from("text")), ("text", JsonValue::String(text))])
}

fn merge_image_path(structured: JsonValue, path: &str, mime_type: &str) -> JsonValue {
    match structured {
        JsonValue::Object(mut object) => {
            object.insert("imagePath".into(), JsonValue::from(path));
            object.insert("imageMimeType".into(), JsonValue::from(mime_type));
            JsonValue::Object(object)
        }
        other => JsonValue::object([
            ("payload", other),
            ("imagePath", JsonValue::from(path)),
            ("imageMimeType", JsonValue::from(mime_type)),
        ]),
    }
}

fn materialize_image(image: &ToolImage) -> Option<PathBuf> {
    let bytes = BASE64.decode(image.base64.as_bytes()).ok()?;
    let dir = std::env::temp_dir().join(IMAGE_DIR_NAME);
    let extension = if image.mime_type == "image/jpeg" { "jpg" } else { "png" };
    let path = dir.join(format!("{}.{extension}", Uuid::new_v4()));
    let written = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, &bytes));
    match written {
        Ok(()) => Some(path),
        Err(err) => {
            debug!(error = %err, "failed to materialize image");
            None
        }
    }
}

/// Backend that lists and executes tools on behalf of the session.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Static catalog
    fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Execute `name` with raw (unvalidated) arguments.
    async fn call_tool(&self, name: &str, arguments: Option<JsonValue>) -> ToolResult<ToolCallResult>;
}
