//! Shared domain types
//!
//! Receipts, risk classes and the adapter-facing descriptors that flow between
//! the MCP tool executor, the automation queue and the broker.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::mcp::JsonValue;

/// Policy mode persisted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Actions limited to whitelisted targets
    #[default]
    Restricted,
    /// No target restrictions
    FullAuto,
}

impl SafetyMode {
    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyMode::Restricted => "restricted",
            SafetyMode::FullAuto => "full_auto",
        }
    }

    /// Parse a wire name
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "restricted" => Some(SafetyMode::Restricted),
            "full_auto" => Some(SafetyMode::FullAuto),
            _ => None,
        }
    }
}

/// Coarse risk classification attached to a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Routine interaction
    Low,
    /// Destructive or hard-to-undo interaction
    High,
}

impl RiskClass {
    /// Parse a wire name, falling back to `default` for anything unknown.
    pub fn parse_or(raw: Option<&str>, default: RiskClass) -> RiskClass {
        match raw {
            Some("low") => RiskClass::Low,
            Some("high") => RiskClass::High,
            _ => default,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::Low => "low",
            RiskClass::High => "high",
        }
    }
}

/// Outcome status of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The operation ran to completion
    Executed,
    /// Waiting on a confirmation token
    PendingConfirmation,
    /// Refused by the safety hook
    Rejected,
    /// Cancelled before or during execution
    Cancelled,
}

impl ActionStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Executed => "executed",
            ActionStatus::PendingConfirmation => "pending_confirmation",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform result envelope for every item that passes through the automation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReceipt {
    /// Queue item id (filled in by the queue when left empty)
    pub action_id: String,
    /// Outcome
    pub status: ActionStatus,
    /// Human-readable summary
    pub message: String,
    /// Token a client must echo to confirm a pending action
    pub confirmation_token: Option<String>,
    /// Expiry of the confirmation token
    pub expires_at: Option<DateTime<Utc>>,
    /// Operation-specific string data
    pub data: BTreeMap<String, String>,
}

impl ActionReceipt {
    /// Receipt for a completed operation. The queue assigns the id.
    pub fn executed(message: impl Into<String>) -> Self {
        Self {
            action_id: String::new(),
            status: ActionStatus::Executed,
            message: message.into(),
            confirmation_token: None,
            expires_at: None,
            data: BTreeMap::new(),
        }
    }

    /// Synthetic receipt for an action that never ran to completion.
    pub fn cancelled(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Cancelled,
            message: message.into(),
            confirmation_token: None,
            expires_at: None,
            data: BTreeMap::new(),
        }
    }

    /// Receipt for a call refused by the safety hook.
    pub fn rejected(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Rejected,
            message: message.into(),
            confirmation_token: None,
            expires_at: None,
            data: BTreeMap::new(),
        }
    }

    /// Attach a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Render as the structured tool payload.
    pub fn to_value(&self) -> JsonValue {
        let data = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::from(v.as_str())))
            .collect();
        JsonValue::object([
            ("action_id", JsonValue::from(self.action_id.as_str())),
            ("status", JsonValue::from(self.status.as_str())),
            ("message", JsonValue::from(self.message.as_str())),
            (
                "confirmation_token",
                self.confirmation_token
                    .as_deref()
                    .map(JsonValue::from)
                    .unwrap_or(JsonValue::Null),
            ),
            (
                "expires_at",
                self.expires_at
                    .map(|at| JsonValue::String(at.to_rfc3339_opts(SecondsFormat::Secs, true)))
                    .unwrap_or(JsonValue::Null),
            ),
            ("data", JsonValue::Object(data)),
        ])
    }
}

/// Mouse button selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    /// Primary button
    #[default]
    Left,
    /// Secondary button
    Right,
    /// Middle button
    Center,
}

impl MouseButton {
    /// Parse a wire name, defaulting to left.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("right") => MouseButton::Right,
            Some("center") => MouseButton::Center,
            _ => MouseButton::Left,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Center => "center",
        }
    }
}

/// Strategy used to type text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextInputMode {
    /// Paste, falling back to keystrokes
    #[default]
    Auto,
    /// Clipboard paste only
    Paste,
    /// Per-character keystrokes only
    Keystroke,
}

impl TextInputMode {
    /// Parse a wire name, defaulting to auto.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("paste") => TextInputMode::Paste,
            Some("keystroke") => TextInputMode::Keystroke,
            _ => TextInputMode::Auto,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TextInputMode::Auto => "auto",
            TextInputMode::Paste => "paste",
            TextInputMode::Keystroke => "keystroke",
        }
    }
}

/// Backend that executes privileged scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBackend {
    /// The out-of-process broker host
    #[default]
    Broker,
}

/// Rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct WindowFrame {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

/// On-screen window as reported by the window adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDescriptor {
    /// Window number
    pub window_id: u32,
    /// Owning application bundle id, when known
    pub bundle_id: Option<String>,
    /// Owning application name
    pub app_name: String,
    /// Window title
    pub title: String,
    /// Bounds
    pub frame: WindowFrame,
    /// Whether the window belongs to the frontmost application
    pub is_focused: bool,
}

impl WindowDescriptor {
    /// Render as a tool payload entry
    pub fn to_value(&self) -> JsonValue {
        JsonValue::object([
            ("window_id", JsonValue::from(self.window_id as f64)),
            (
                "bundle_id",
                self.bundle_id
                    .as_deref()
                    .map(JsonValue::from)
                    .unwrap_or(JsonValue::Null),
            ),
            ("app_name", JsonValue::from(self.app_name.as_str())),
            ("title", JsonValue::from(self.title.as_str())),
            (
                "frame",
                JsonValue::object([
                    ("x", JsonValue::from(self.frame.x)),
                    ("y", JsonValue::from(self.frame.y)),
                    ("width", JsonValue::from(self.frame.width)),
                    ("height", JsonValue::from(self.frame.height)),
                ]),
            ),
            ("is_focused", JsonValue::Bool(self.is_focused)),
        ])
    }
}

/// Capture rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureRegion {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

/// Encoded screen image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Base64 image bytes
    pub image_base64: String,
    /// `png` or `jpeg`
    pub format: String,
    /// Pixel width
    pub width: u32,
    /// Pixel height
    pub height: u32,
}

/// Outcome of an automation permission probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionProbeStatus {
    /// The probe script ran
    Granted,
    /// The OS refused Apple Events
    Denied,
    /// The user dismissed the prompt
    NotDetermined,
    /// Anything else
    Error,
}

impl PermissionProbeStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionProbeStatus::Granted => "granted",
            PermissionProbeStatus::Denied => "denied",
            PermissionProbeStatus::NotDetermined => "not_determined",
            PermissionProbeStatus::Error => "error",
        }
    }
}

/// Machine-readable permission and broker failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionErrorCode {
    /// Apple Events to the target were refused
    AutomationNotAllowed,
    /// Accessibility access is missing
    AccessibilityMissing,
    /// Screen recording access is missing
    ScreenRecordingMissing,
    /// The broker could not be reached
    BrokerUnavailable,
    /// A privileged execution failed
    ExecFailed,
}

impl PermissionErrorCode {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionErrorCode::AutomationNotAllowed => "AUTOMATION_NOT_ALLOWED",
            PermissionErrorCode::AccessibilityMissing => "ACCESSIBILITY_MISSING",
            PermissionErrorCode::ScreenRecordingMissing => "SCREEN_RECORDING_MISSING",
            PermissionErrorCode::BrokerUnavailable => "BROKER_UNAVAILABLE",
            PermissionErrorCode::ExecFailed => "EXEC_FAILED",
        }
    }
}

impl fmt::Display for PermissionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of a permission probe.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionProbeResult {
    /// Classification
    pub status: PermissionProbeStatus,
    /// Code, absent for granted and not_determined
    pub error_code: Option<PermissionErrorCode>,
    /// Human-readable summary
    pub message: String,
    /// Ordered remediation steps
    pub remediation: Vec<String>,
}
