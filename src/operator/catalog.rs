//! Static tool catalog

use crate::mcp::{SchemaProperty, ToolDefinition, ToolSchema};

const COMPAT_NOTE: &str = "risk_class/confirmation_token are accepted for backward compatibility but ignored.";
const DEPRECATED_NOOP: &str = "Deprecated no-op. Approval flow is disabled.";

/// Tool whose description carries the legacy approval-field note.
fn legacy_tool(name: &str, summary: &str, schema: ToolSchema) -> ToolDefinition {
    ToolDefinition::new(name, &format!("{summary} {COMPAT_NOTE}"), schema)
}

/// Adds the legacy approval fields every mutating tool still accepts.
fn with_risk_fields(schema: ToolSchema) -> ToolSchema {
    schema
        .property("risk_class", SchemaProperty::one_of(&["low", "high"]))
        .property("confirmation_token", SchemaProperty::string())
}

/// Adds window/app targeting for input tools.
fn with_interaction_target(schema: ToolSchema) -> ToolSchema {
    with_risk_fields(
        schema
            .property("window_id", SchemaProperty::integer())
            .property("bundle_id", SchemaProperty::string())
            .property("auto_focus", SchemaProperty::boolean())
            .property("launch_if_needed", SchemaProperty::boolean()),
    )
}

fn open_schema(required: &str) -> ToolSchema {
    ToolSchema::new()
        .required(&[required])
        .property(required, SchemaProperty::string())
        .property("bundle_id", SchemaProperty::string())
        .property("activate", SchemaProperty::boolean())
}

/// Every tool the operator serves, in listing order.
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "set_safety_mode",
            DEPRECATED_NOOP,
            ToolSchema::new()
                .required(&["mode"])
                .property("mode", SchemaProperty::one_of(&["restricted", "full_auto"]))
                .property("persist", SchemaProperty::boolean()),
        ),
        ToolDefinition::new(
            "update_app_whitelist",
            DEPRECATED_NOOP,
            ToolSchema::new()
                .required(&["operation", "bundle_ids"])
                .property("operation", SchemaProperty::one_of(&["set", "add", "remove"]))
                .property("bundle_ids", SchemaProperty::array_of(SchemaProperty::string())),
        ),
        ToolDefinition::new(
            "list_windows",
            "List windows on the current display.",
            ToolSchema::new().property("include_minimized", SchemaProperty::boolean()),
        ),
        ToolDefinition::new(
            "focus_window",
            "Focus a window by window_id or bundle_id.",
            ToolSchema::new()
                .property("window_id", SchemaProperty::integer())
                .property("bundle_id", SchemaProperty::string())
                .property("launch_if_needed", SchemaProperty::boolean())
                .property("activate_all_windows", SchemaProperty::boolean()),
        ),
        ToolDefinition::new(
            "mouse_move",
            "Move the mouse cursor to absolute screen coordinates.",
            ToolSchema::new()
                .required(&["x", "y"])
                .property("x", SchemaProperty::number())
                .property("y", SchemaProperty::number())
                .property("duration_ms", SchemaProperty::integer()),
        ),
        legacy_tool(
            "mouse_click",
            "Click mouse at coordinates.",
            with_interaction_target(
                ToolSchema::new()
                    .required(&["x", "y"])
                    .property("x", SchemaProperty::number())
                    .property("y", SchemaProperty::number())
                    .property("button", SchemaProperty::one_of(&["left", "right", "center"]))
                    .property("click_count", SchemaProperty::integer()),
            ),
        ),
        legacy_tool(
            "mouse_drag",
            "Drag from one coordinate to another.",
            with_interaction_target(
                ToolSchema::new()
                    .required(&["from_x", "from_y", "to_x", "to_y"])
                    .property("from_x", SchemaProperty::number())
                    .property("from_y", SchemaProperty::number())
                    .property("to_x", SchemaProperty::number())
                    .property("to_y", SchemaProperty::number())
                    .property("duration_ms", SchemaProperty::integer()),
            ),
        ),
        legacy_tool(
            "mouse_scroll",
            "Scroll by horizontal/vertical deltas.",
            with_interaction_target(
                ToolSchema::new()
                    .required(&["delta_x", "delta_y"])
                    .property("delta_x", SchemaProperty::number())
                    .property("delta_y", SchemaProperty::number()),
            ),
        ),
        legacy_tool(
            "text_input",
            "Input text using paste/keystroke strategy.",
            with_interaction_target(
                ToolSchema::new()
                    .required(&["text"])
                    .property("text", SchemaProperty::string())
                    .property("mode", SchemaProperty::one_of(&["auto", "paste", "keystroke"])),
            ),
        ),
        legacy_tool(
            "key_chord",
            "Execute a keyboard chord, optionally repeated.",
            with_interaction_target(
                ToolSchema::new()
                    .required(&["keys"])
                    .property("keys", SchemaProperty::array_of(SchemaProperty::string()))
                    .property("repeat", SchemaProperty::integer()),
            ),
        ),
        ToolDefinition::new(
            "screen_capture",
            "Capture screen image; response image delivery is client-aware for Codex/Claude compatibility.",
            ToolSchema::new()
                .property(
                    "region",
                    SchemaProperty::object(
                        &["x", "y", "width", "height"],
                        [
                            ("x", SchemaProperty::number()),
                            ("y", SchemaProperty::number()),
                            ("width", SchemaProperty::number()),
                            ("height", SchemaProperty::number()),
                        ],
                    ),
                )
                .property("format", SchemaProperty::one_of(&["png", "jpeg"]))
                .property("quality", SchemaProperty::number()),
        ),
        ToolDefinition::new(
            "app_launch",
            "Launch an app globally without mouse interaction.",
            ToolSchema::new()
                .property("bundle_id", SchemaProperty::string())
                .property("app_name", SchemaProperty::string())
                .property("activate", SchemaProperty::boolean()),
        ),
        ToolDefinition::new(
            "app_open_url",
            "Open a URL globally using the system or a specific app.",
            open_schema("url"),
        ),
        ToolDefinition::new(
            "app_open_path",
            "Open a local path globally using the system or a specific app.",
            open_schema("path"),
        ),
        legacy_tool(
            "app_quit",
            "Quit a running app globally without mouse interaction.",
            with_risk_fields(
                ToolSchema::new()
                    .required(&["bundle_id"])
                    .property("bundle_id", SchemaProperty::string()),
            ),
        ),
        legacy_tool(
            "applescript_run",
            "Run AppleScript via local broker app.",
            with_risk_fields(
                ToolSchema::new()
                    .required(&["script"])
                    .property("script", SchemaProperty::string())
                    .property("target_bundle_id", SchemaProperty::string()),
            ),
        ),
        legacy_tool(
            "applescript_app_command",
            "Run an AppleScript command inside a specific app via local broker app.",
            with_risk_fields(
                ToolSchema::new()
                    .required(&["command"])
                    .property("bundle_id", SchemaProperty::string())
                    .property("app_name", SchemaProperty::string())
                    .property("command", SchemaProperty::string())
                    .property("activate", SchemaProperty::boolean()),
            ),
        ),
        ToolDefinition::new(
            "permissions_status",
            "Get local Accessibility/Screen Recording/Automation broker status.",
            ToolSchema::new(),
        ),
        ToolDefinition::new(
            "permissions_probe_automation",
            "Probe Apple Events automation permission for a target app using a minimal broker-side script.",
            ToolSchema::new()
                .property("bundle_id", SchemaProperty::string())
                .property("app_name", SchemaProperty::string()),
        ),
        ToolDefinition::new(
            "permissions_open_settings",
            "Open System Settings Privacy section for accessibility, screen recording, or automation.",
            ToolSchema::new().required(&["section"]).property(
                "section",
                SchemaProperty::one_of(&["accessibility", "screen_recording", "automation"]),
            ),
        ),
        ToolDefinition::new(
            "automation_stop",
            "Cancel queued and in-flight automation actions.",
            ToolSchema::new(),
        ),
    ]
}
