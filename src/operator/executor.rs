//! Tool executor
//!
//! Every call runs the same pipeline: catalog lookup, schema validation,
//! tool-specific preconditions, the safety policy, the automation queue, the
//! audit log and finally receipt rendering. Read-only tools skip the queue.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::args::Args;
use super::catalog::all_tools;
use crate::adapters::{
    CaptureAdapter, InputAdapter, KeyChord, PermissionChecker, WindowAdapter, WorkspaceAdapter,
};
use crate::audit::{AuditEvent, AuditLogger};
use crate::automation::{AutomationError, AutomationQueue, AutomationResult};
use crate::broker::{BrokerApi, BrokerClientError};
use crate::config::{AppConfig, ConfigStore, expand_tilde};
use crate::mcp::{JsonValue, ToolCallResult, ToolDefinition, ToolError, ToolExecutor, ToolResult};
use crate::safety::{SafetyDecision, SafetyPolicy, SafetyRequest, fingerprint};
use crate::types::{
    ActionReceipt, ActionStatus, CaptureRegion, MouseButton, PermissionProbeStatus, RiskClass,
    SafetyMode, TextInputMode,
};

const ACCESSIBILITY_MISSING: &str =
    "ACCESSIBILITY_MISSING: Enable permission in System Settings > Privacy & Security > Accessibility.";
const SCREEN_RECORDING_MISSING: &str = "SCREEN_RECORDING_MISSING: Enable permission in System Settings > Privacy & Security > Screen Recording.";

const DEFAULT_JPEG_QUALITY: f64 = 0.7;
const DEFAULT_DRAG_MS: i64 = 150;

const SETTINGS_ACCESSIBILITY: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility";
const SETTINGS_SCREEN_RECORDING: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenCapture";
const SETTINGS_AUTOMATION: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_Automation";

/// OS collaborators driven by the executor.
#[derive(Clone)]
pub struct OperatorAdapters {
    /// Mouse and keyboard
    pub input: Arc<dyn InputAdapter>,
    /// Window listing and focus
    pub windows: Arc<dyn WindowAdapter>,
    /// Screen capture
    pub capture: Arc<dyn CaptureAdapter>,
    /// Privacy permission checks
    pub permissions: Arc<dyn PermissionChecker>,
    /// `open` and app quit
    pub workspace: Arc<dyn WorkspaceAdapter>,
}

/// Components the executor is wired from.
#[derive(Clone)]
pub struct OperatorDeps {
    /// Configuration store
    pub config: Arc<ConfigStore>,
    /// Audit trail
    pub audit: Arc<AuditLogger>,
    /// Policy consulted before mutating calls
    pub safety: Arc<dyn SafetyPolicy>,
    /// Single-flight action queue
    pub queue: AutomationQueue,
    /// Privileged script broker
    pub broker: Arc<dyn BrokerApi>,
    /// OS adapters
    pub adapters: OperatorAdapters,
}

/// Safety and audit inputs of one mutating call.
struct Gate<'a> {
    tool: &'a str,
    risk: RiskClass,
    confirmation_token: Option<&'a str>,
    target: Option<String>,
    fields: BTreeMap<String, String>,
}

impl<'a> Gate<'a> {
    fn low(tool: &'a str, target: Option<String>, fields: BTreeMap<String, String>) -> Self {
        Self {
            tool,
            risk: RiskClass::Low,
            confirmation_token: None,
            target,
            fields,
        }
    }

    fn from_args(
        tool: &'a str,
        args: &Args<'a>,
        default_risk: RiskClass,
        target: Option<String>,
        fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            tool,
            risk: RiskClass::parse_or(args.str("risk_class"), default_risk),
            confirmation_token: args.str("confirmation_token"),
            target,
            fields,
        }
    }
}

/// Optional window or app an input tool is aimed at.
struct InteractionTarget<'a> {
    window_id: Option<u32>,
    bundle_id: Option<&'a str>,
    auto_focus: bool,
    launch_if_needed: bool,
}

impl<'a> InteractionTarget<'a> {
    fn parse(args: &Args<'a>) -> ToolResult<Self> {
        Ok(Self {
            window_id: args.window_id()?,
            bundle_id: args.str("bundle_id"),
            auto_focus: args.flag("auto_focus"),
            launch_if_needed: args.flag("launch_if_needed"),
        })
    }

    fn extend(&self, fields: &mut BTreeMap<String, String>) {
        fields.extend(fields_of([
            (
                "window_id",
                self.window_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
            ("bundle_id", self.bundle_id.unwrap_or_default().to_string()),
            ("auto_focus", self.auto_focus.to_string()),
            ("launch_if_needed", self.launch_if_needed.to_string()),
        ]));
    }
}

fn fields_of<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn receipt_result(receipt: &ActionReceipt) -> ToolCallResult {
    ToolCallResult::ok(receipt.to_value(), receipt.message.clone())
}

/// Map a queued operation's failure onto the tool result contract.
///
/// Broker script failures that carry captured output are reported as a
/// result with `isError` so the output reaches the client.
fn automation_failure(tool: &str, err: AutomationError) -> ToolResult<ToolCallResult> {
    match err {
        AutomationError::Broker(BrokerClientError {
            code,
            message,
            output: Some(output),
        }) => {
            debug!(tool, %code, "script failed with captured output");
            let text = format!("{code}: {message}");
            Ok(ToolCallResult::error(
                JsonValue::object([
                    ("error_code", JsonValue::from(code.as_str())),
                    ("message", JsonValue::String(message)),
                    ("stdout", JsonValue::String(output.stdout)),
                    ("stderr", JsonValue::String(output.stderr)),
                ]),
                text,
            ))
        }
        other => {
            warn!(tool, error = %other, "tool action failed");
            Err(ToolError::execution_failed(other.to_string()))
        }
    }
}

/// `open` arguments: background unless `activate`, then the app selector.
fn open_args(activate: bool, bundle_id: Option<&str>, app_name: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();
    if !activate {
        args.push("-g".to_string());
    }
    if let Some(bundle_id) = bundle_id {
        args.extend(["-b".to_string(), bundle_id.to_string()]);
    } else if let Some(app_name) = app_name {
        args.extend(["-a".to_string(), app_name.to_string()]);
    }
    args
}

/// Whether `url` starts with an RFC 3986 scheme.
fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// JPEG quality to request, `None` for PNG.
fn capture_quality(format: Option<&str>, quality: Option<f64>) -> Option<f64> {
    match format {
        Some("png") => None,
        _ => Some(quality.unwrap_or(DEFAULT_JPEG_QUALITY)),
    }
}

fn settings_url(section: &str) -> ToolResult<&'static str> {
    match section {
        "accessibility" => Ok(SETTINGS_ACCESSIBILITY),
        "screen_recording" => Ok(SETTINGS_SCREEN_RECORDING),
        "automation" => Ok(SETTINGS_AUTOMATION),
        _ => Err(ToolError::invalid_params(
            "section must be accessibility|screen_recording|automation",
        )),
    }
}

/// [`ToolExecutor`] serving the operator tool catalog.
pub struct OperatorToolExecutor {
    tools: Vec<ToolDefinition>,
    deps: OperatorDeps,
}

impl OperatorToolExecutor {
    /// Executor over the full catalog
    pub fn new(deps: OperatorDeps) -> Self {
        Self::with_tools(all_tools(), deps)
    }

    /// Executor over a custom catalog
    pub fn with_tools(tools: Vec<ToolDefinition>, deps: OperatorDeps) -> Self {
        Self { tools, deps }
    }

    /// The queue actions are serialized through
    pub fn queue(&self) -> &AutomationQueue {
        &self.deps.queue
    }

    fn load_config(&self) -> ToolResult<AppConfig> {
        self.deps
            .config
            .load()
            .map_err(|err| ToolError::execution_failed(format!("{err:#}")))
    }

    fn record(
        &self,
        tool: &str,
        target: Option<String>,
        status: ActionStatus,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) {
        self.deps
            .audit
            .log(AuditEvent::now(tool, target, status, message, metadata));
    }

    fn evaluate_safety(&self, gate: &Gate<'_>) -> Option<ToolCallResult> {
        let fingerprint = fingerprint(gate.tool, &gate.fields);
        let request = SafetyRequest {
            tool: gate.tool,
            risk: gate.risk,
            target_bundle_id: gate.target.as_deref(),
            confirmation_token: gate.confirmation_token,
            fingerprint: &fingerprint,
        };
        match self.deps.safety.evaluate(&request) {
            SafetyDecision::Allow => None,
            SafetyDecision::Reject(message) => {
                info!(tool = gate.tool, %message, "safety policy rejected call");
                let receipt = ActionReceipt::rejected(Uuid::new_v4().to_string(), message);
                Some(ToolCallResult::error(receipt.to_value(), receipt.message))
            }
        }
    }

    /// Safety check, enqueue, audit and render one mutating action.
    async fn perform<F, Fut>(
        &self,
        gate: Gate<'_>,
        metadata: BTreeMap<String, String>,
        operation: F,
    ) -> ToolResult<ToolCallResult>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = AutomationResult<ActionReceipt>> + Send + 'static,
    {
        if let Some(rejected) = self.evaluate_safety(&gate) {
            return Ok(rejected);
        }

        let receipt = match self.deps.queue.enqueue(gate.tool, operation).await {
            Ok(receipt) => receipt,
            Err(err) => return automation_failure(gate.tool, err),
        };

        self.record(gate.tool, gate.target, receipt.status, &receipt.message, metadata);
        Ok(receipt_result(&receipt))
    }

    async fn ensure_accessibility(&self) -> ToolResult<()> {
        let checker = &self.deps.adapters.permissions;
        if !checker.has_accessibility(false).await {
            let _ = checker.has_accessibility(true).await;
        }
        if checker.has_accessibility(false).await {
            Ok(())
        } else {
            Err(ToolError::execution_failed(ACCESSIBILITY_MISSING))
        }
    }

    async fn has_screen_recording(&self) -> bool {
        let checker = &self.deps.adapters.permissions;
        if !checker.has_screen_recording(false).await {
            let _ = checker.has_screen_recording(true).await;
        }
        checker.has_screen_recording(false).await
    }

    async fn bundle_for_window(&self, window_id: Option<u32>) -> Option<String> {
        let window_id = window_id?;
        self.deps
            .adapters
            .windows
            .list_windows(true)
            .await
            .into_iter()
            .find(|window| window.window_id == window_id)
            .and_then(|window| window.bundle_id)
    }

    /// Resolve the app an input action lands on, focusing it first when
    /// asked to.
    async fn resolve_target(
        &self,
        target: &InteractionTarget<'_>,
        tool: &str,
    ) -> ToolResult<Option<String>> {
        let windows = &self.deps.adapters.windows;
        let frontmost = windows.frontmost_bundle_id().await;

        if target.window_id.is_none() && target.bundle_id.is_none() {
            return Ok(frontmost);
        }

        let resolved = match target.bundle_id {
            Some(bundle_id) => Some(bundle_id.to_string()),
            None => self.bundle_for_window(target.window_id).await,
        };
        let Some(resolved) = resolved else {
            return Err(ToolError::execution_failed(format!(
                "TARGET_UNRESOLVED: unable to resolve target bundle for {tool}"
            )));
        };

        if frontmost.as_deref() == Some(resolved.as_str()) {
            return Ok(Some(resolved));
        }

        if !target.auto_focus {
            return Err(ToolError::execution_failed(format!(
                "TARGET_NOT_FRONTMOST: {resolved} is not frontmost. Set auto_focus=true to focus before {tool}."
            )));
        }

        debug!(tool, target = %resolved, "focusing target before input");
        windows
            .focus_window(
                target.window_id,
                target.bundle_id,
                target.launch_if_needed,
                false,
            )
            .await
            .map_err(|err| ToolError::execution_failed(err.to_string()))?;

        Ok(windows.frontmost_bundle_id().await.or(Some(resolved)))
    }

    async fn set_safety_mode(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let requested = args.required_str("mode")?;
        let mode = SafetyMode::parse(requested)
            .ok_or_else(|| ToolError::invalid_params("mode must be restricted or full_auto"))?;
        let persist = args.flag("persist");
        let config = self.load_config()?;

        self.record(
            "set_safety_mode",
            None,
            ActionStatus::Executed,
            "set_safety_mode is deprecated and is now a no-op",
            fields_of([
                ("requested_mode", mode.as_str().to_string()),
                ("persist_requested", persist.to_string()),
            ]),
        );

        Ok(ToolCallResult::ok(
            JsonValue::object([
                ("mode", JsonValue::from(config.default_mode.as_str())),
                ("requested_mode", JsonValue::from(mode.as_str())),
                ("persist_requested", JsonValue::Bool(persist)),
                ("deprecated", JsonValue::Bool(true)),
                ("approval_flow_disabled", JsonValue::Bool(true)),
            ]),
            "approval flow disabled; set_safety_mode is deprecated no-op",
        ))
    }

    async fn update_app_whitelist(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let operation = args.required_str("operation")?;
        args.required_strings("bundle_ids")?;
        let config = self.load_config()?;

        self.record(
            "update_app_whitelist",
            None,
            ActionStatus::Executed,
            "update_app_whitelist is deprecated and is now a no-op",
            fields_of([("operation", operation.to_string())]),
        );

        Ok(ToolCallResult::ok(
            JsonValue::object([
                (
                    "effective_whitelist",
                    JsonValue::string_array(&config.app_whitelist),
                ),
                ("deprecated", JsonValue::Bool(true)),
                ("approval_flow_disabled", JsonValue::Bool(true)),
            ]),
            "approval flow disabled; update_app_whitelist is deprecated no-op",
        ))
    }

    async fn list_windows(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let windows = self
            .deps
            .adapters
            .windows
            .list_windows(args.flag("include_minimized"))
            .await;
        let payload = windows.iter().map(|window| window.to_value()).collect();
        Ok(ToolCallResult::ok(
            JsonValue::object([("windows", JsonValue::Array(payload))]),
            format!("Listed {} windows", windows.len()),
        ))
    }

    async fn focus_window(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let window_id = args.window_id()?;
        let bundle_id = args.str("bundle_id").map(str::to_string);
        let launch_if_needed = args.flag("launch_if_needed");
        let activate_all_windows = args.flag("activate_all_windows");

        if window_id.is_none() && bundle_id.is_none() {
            return Err(ToolError::invalid_params(
                "focus_window requires window_id or bundle_id",
            ));
        }

        let target = match &bundle_id {
            Some(bundle_id) => Some(bundle_id.clone()),
            None => self.bundle_for_window(window_id).await,
        };
        let gate = Gate::low(
            "focus_window",
            target.clone(),
            fields_of([
                (
                    "window_id",
                    window_id.map(|id| id.to_string()).unwrap_or_default(),
                ),
                ("bundle_id", bundle_id.clone().unwrap_or_default()),
                ("launch_if_needed", launch_if_needed.to_string()),
                ("activate_all_windows", activate_all_windows.to_string()),
            ]),
        );
        let metadata = fields_of([("bundle_id", target.unwrap_or_default())]);

        let windows = self.deps.adapters.windows.clone();
        self.perform(gate, metadata, move |_cancel| async move {
            let focused = windows
                .focus_window(
                    window_id,
                    bundle_id.as_deref(),
                    launch_if_needed,
                    activate_all_windows,
                )
                .await?;
            Ok(ActionReceipt::executed("Window focused")
                .with_data("bundle_id", focused.unwrap_or_default()))
        })
        .await
    }

    async fn mouse_move(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        self.ensure_accessibility().await?;

        let x = args.required_f64("x")?;
        let y = args.required_f64("y")?;
        let duration_ms = args.int("duration_ms").unwrap_or(0);
        let target = self.deps.adapters.windows.frontmost_bundle_id().await;

        let gate = Gate::low(
            "mouse_move",
            target,
            fields_of([
                ("x", x.to_string()),
                ("y", y.to_string()),
                ("duration_ms", duration_ms.to_string()),
            ]),
        );
        let metadata = fields_of([("x", x.to_string()), ("y", y.to_string())]);

        let input = self.deps.adapters.input.clone();
        self.perform(gate, metadata, move |cancel| async move {
            input.move_mouse(x, y, duration_ms, &cancel).await?;
            Ok(ActionReceipt::executed("Mouse moved"))
        })
        .await
    }

    async fn mouse_click(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        self.ensure_accessibility().await?;

        let x = args.required_f64("x")?;
        let y = args.required_f64("y")?;
        let button = MouseButton::parse(args.str("button"));
        let click_count = args.int("click_count").unwrap_or(1);
        let target = InteractionTarget::parse(&args)?;
        let resolved = self.resolve_target(&target, "mouse_click").await?;

        let mut fields = fields_of([
            ("x", x.to_string()),
            ("y", y.to_string()),
            ("button", button.as_str().to_string()),
            ("click_count", click_count.to_string()),
        ]);
        target.extend(&mut fields);
        let gate = Gate::from_args("mouse_click", &args, RiskClass::Low, resolved, fields);
        let metadata = fields_of([
            ("button", button.as_str().to_string()),
            ("click_count", click_count.to_string()),
        ]);

        let input = self.deps.adapters.input.clone();
        self.perform(gate, metadata, move |cancel| async move {
            input.click_mouse(x, y, button, click_count, &cancel).await?;
            Ok(ActionReceipt::executed("Mouse click executed"))
        })
        .await
    }

    async fn mouse_drag(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        self.ensure_accessibility().await?;

        let from = (args.required_f64("from_x")?, args.required_f64("from_y")?);
        let to = (args.required_f64("to_x")?, args.required_f64("to_y")?);
        let duration_ms = args.int("duration_ms").unwrap_or(DEFAULT_DRAG_MS);
        let target = InteractionTarget::parse(&args)?;
        let resolved = self.resolve_target(&target, "mouse_drag").await?;

        let mut fields = fields_of([
            ("from_x", from.0.to_string()),
            ("from_y", from.1.to_string()),
            ("to_x", to.0.to_string()),
            ("to_y", to.1.to_string()),
            ("duration_ms", duration_ms.to_string()),
        ]);
        target.extend(&mut fields);
        let gate = Gate::from_args("mouse_drag", &args, RiskClass::Low, resolved, fields);
        let metadata = fields_of([
            ("from", format!("{},{}", from.0, from.1)),
            ("to", format!("{},{}", to.0, to.1)),
        ]);

        let input = self.deps.adapters.input.clone();
        self.perform(gate, metadata, move |cancel| async move {
            input.drag_mouse(from, to, duration_ms, &cancel).await?;
            Ok(ActionReceipt::executed("Mouse drag executed"))
        })
        .await
    }

    async fn mouse_scroll(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        self.ensure_accessibility().await?;

        let delta_x = args.required_f64("delta_x")?;
        let delta_y = args.required_f64("delta_y")?;
        let target = InteractionTarget::parse(&args)?;
        let resolved = self.resolve_target(&target, "mouse_scroll").await?;

        let mut fields = fields_of([
            ("delta_x", delta_x.to_string()),
            ("delta_y", delta_y.to_string()),
        ]);
        target.extend(&mut fields);
        let gate = Gate::from_args("mouse_scroll", &args, RiskClass::Low, resolved, fields);
        let metadata = fields_of([
            ("delta_x", delta_x.to_string()),
            ("delta_y", delta_y.to_string()),
        ]);

        let input = self.deps.adapters.input.clone();
        self.perform(gate, metadata, move |cancel| async move {
            input.scroll(delta_x, delta_y, &cancel).await?;
            Ok(ActionReceipt::executed("Scroll executed"))
        })
        .await
    }

    async fn text_input(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        self.ensure_accessibility().await?;

        let text = args.required_str("text")?.to_string();
        let mode = TextInputMode::parse(args.str("mode"));
        let target = InteractionTarget::parse(&args)?;
        let resolved = self.resolve_target(&target, "text_input").await?;

        let mut fields = fields_of([
            ("text", text.clone()),
            ("mode", mode.as_str().to_string()),
        ]);
        target.extend(&mut fields);
        let gate = Gate::from_args("text_input", &args, RiskClass::Low, resolved, fields);
        let metadata = fields_of([
            ("mode", mode.as_str().to_string()),
            ("text", text.clone()),
        ]);

        let input = self.deps.adapters.input.clone();
        self.perform(gate, metadata, move |cancel| async move {
            input.text_input(&text, mode, &cancel).await?;
            Ok(ActionReceipt::executed("Text input executed"))
        })
        .await
    }

    async fn key_chord(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        self.ensure_accessibility().await?;

        let keys = args.required_strings("keys")?;
        let repeat = args.int("repeat").unwrap_or(1);
        let normalized = KeyChord::normalize(&keys);

        let config = self.load_config()?;
        let dangerous = config
            .dangerous_key_chords
            .iter()
            .any(|chord| KeyChord::normalize(chord) == normalized);

        let target = InteractionTarget::parse(&args)?;
        let resolved = self.resolve_target(&target, "key_chord").await?;

        let mut fields = fields_of([
            ("keys", normalized.clone()),
            ("repeat", repeat.to_string()),
        ]);
        target.extend(&mut fields);
        let mut gate = Gate::from_args("key_chord", &args, RiskClass::Low, resolved, fields);
        if dangerous {
            gate.risk = RiskClass::High;
        }
        let metadata = fields_of([("keys", normalized), ("repeat", repeat.to_string())]);

        let input = self.deps.adapters.input.clone();
        self.perform(gate, metadata, move |cancel| async move {
            input.key_chord(&keys, repeat, &cancel).await?;
            Ok(ActionReceipt::executed("Key chord executed"))
        })
        .await
    }

    async fn screen_capture(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        if !self.has_screen_recording().await {
            return Ok(ToolCallResult::error(
                JsonValue::object([("error", JsonValue::from(SCREEN_RECORDING_MISSING))]),
                SCREEN_RECORDING_MISSING,
            ));
        }

        let quality = capture_quality(args.str("format"), args.f64("quality"));
        let region = match args.object("region") {
            Some(region) => Some(CaptureRegion {
                x: region.required_f64("x")?,
                y: region.required_f64("y")?,
                width: region.required_f64("width")?,
                height: region.required_f64("height")?,
            }),
            None => None,
        };

        let result = self
            .deps
            .adapters
            .capture
            .capture(region, quality)
            .await
            .map_err(|err| ToolError::execution_failed(err.to_string()))?;

        let frontmost = self.deps.adapters.windows.frontmost_bundle_id().await;
        self.record(
            "screen_capture",
            frontmost,
            ActionStatus::Executed,
            "Screen captured",
            fields_of([
                ("width", result.width.to_string()),
                ("height", result.height.to_string()),
            ]),
        );

        let mime_type = if result.format == "jpeg" {
            "image/jpeg"
        } else {
            "image/png"
        };
        Ok(ToolCallResult::ok(
            JsonValue::object([
                ("format", JsonValue::from(result.format.as_str())),
                ("width", JsonValue::from(f64::from(result.width))),
                ("height", JsonValue::from(f64::from(result.height))),
            ]),
            format!("Captured screen image {}x{}", result.width, result.height),
        )
        .with_image(result.image_base64, mime_type))
    }

    async fn app_launch(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let bundle_id = args.str("bundle_id").map(str::to_string);
        let app_name = args.str("app_name").map(str::to_string);
        let activate = args.flag("activate");

        if bundle_id.is_none() && app_name.is_none() {
            return Err(ToolError::invalid_params(
                "app_launch requires bundle_id or app_name",
            ));
        }

        let fields = fields_of([
            ("bundle_id", bundle_id.clone().unwrap_or_default()),
            ("app_name", app_name.clone().unwrap_or_default()),
            ("activate", activate.to_string()),
        ]);
        let gate = Gate::low("app_launch", bundle_id.clone(), fields.clone());

        let workspace = self.deps.adapters.workspace.clone();
        let command = open_args(activate, bundle_id.as_deref(), app_name.as_deref());
        self.perform(gate, fields, move |_cancel| async move {
            workspace.open(&command).await?;
            Ok(ActionReceipt::executed("App launched")
                .with_data("bundle_id", bundle_id.unwrap_or_default())
                .with_data("app_name", app_name.unwrap_or_default()))
        })
        .await
    }

    async fn app_open_url(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let url = args.required_str("url")?.to_string();
        if !has_scheme(&url) {
            return Err(ToolError::invalid_params("url must be an absolute URL"));
        }
        let bundle_id = args.str("bundle_id").map(str::to_string);
        let activate = args.flag("activate");

        let fields = fields_of([
            ("url", url.clone()),
            ("bundle_id", bundle_id.clone().unwrap_or_default()),
            ("activate", activate.to_string()),
        ]);
        let gate = Gate::low("app_open_url", bundle_id.clone(), fields.clone());

        let workspace = self.deps.adapters.workspace.clone();
        let mut command = open_args(activate, bundle_id.as_deref(), None);
        command.push(url.clone());
        self.perform(gate, fields, move |_cancel| async move {
            workspace.open(&command).await?;
            Ok(ActionReceipt::executed("URL opened")
                .with_data("url", url)
                .with_data("bundle_id", bundle_id.unwrap_or_default()))
        })
        .await
    }

    async fn app_open_path(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let path = args.required_str("path")?;
        let bundle_id = args.str("bundle_id").map(str::to_string);
        let activate = args.flag("activate");

        let expanded = expand_tilde(path);
        if !expanded.exists() {
            return Err(ToolError::invalid_params(format!(
                "path does not exist: {path}"
            )));
        }
        let expanded = expanded.display().to_string();

        let fields = fields_of([
            ("path", expanded.clone()),
            ("bundle_id", bundle_id.clone().unwrap_or_default()),
            ("activate", activate.to_string()),
        ]);
        let gate = Gate::low("app_open_path", bundle_id.clone(), fields.clone());

        let workspace = self.deps.adapters.workspace.clone();
        let mut command = open_args(activate, bundle_id.as_deref(), None);
        command.push(expanded.clone());
        self.perform(gate, fields, move |_cancel| async move {
            workspace.open(&command).await?;
            Ok(ActionReceipt::executed("Path opened")
                .with_data("path", expanded)
                .with_data("bundle_id", bundle_id.unwrap_or_default()))
        })
        .await
    }

    async fn app_quit(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let bundle_id = args.required_str("bundle_id")?.to_string();
        let fields = fields_of([("bundle_id", bundle_id.clone())]);
        let gate = Gate::from_args(
            "app_quit",
            &args,
            RiskClass::High,
            Some(bundle_id.clone()),
            fields.clone(),
        );

        let workspace = self.deps.adapters.workspace.clone();
        self.perform(gate, fields, move |_cancel| async move {
            let count = workspace.quit_app(&bundle_id).await?;
            if count == 0 {
                return Err(AutomationError::Failed(format!(
                    "No running app found for bundle id {bundle_id}"
                )));
            }
            Ok(ActionReceipt::executed("App quit requested")
                .with_data("bundle_id", bundle_id)
                .with_data("count", count.to_string()))
        })
        .await
    }

    async fn applescript_run(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let script = args.required_str("script")?.to_string();
        let target = args.str("target_bundle_id").map(str::to_string);

        let gate = Gate::low(
            "applescript_run",
            target.clone(),
            fields_of([
                ("script", script.clone()),
                ("target_bundle_id", target.clone().unwrap_or_default()),
            ]),
        );
        let metadata = fields_of([("target_bundle_id", target.clone().unwrap_or_default())]);

        let broker = self.deps.broker.clone();
        self.perform(gate, metadata, move |_cancel| async move {
            let output = broker.run_applescript(&script, target.as_deref()).await?;
            Ok(ActionReceipt::executed("AppleScript executed")
                .with_data("stdout", output.stdout)
                .with_data("stderr", output.stderr)
                .with_data("target_bundle_id", target.unwrap_or_default()))
        })
        .await
    }

    async fn applescript_app_command(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let bundle_id = args.str("bundle_id").map(str::to_string);
        let app_name = args.str("app_name").map(str::to_string);
        let command = args.required_str("command")?.to_string();
        let activate = args.flag("activate");

        if bundle_id.is_none() && app_name.is_none() {
            return Err(ToolError::invalid_params(
                "applescript_app_command requires bundle_id or app_name",
            ));
        }

        let gate = Gate::low(
            "applescript_app_command",
            bundle_id.clone(),
            fields_of([
                ("bundle_id", bundle_id.clone().unwrap_or_default()),
                ("app_name", app_name.clone().unwrap_or_default()),
                ("command", command.clone()),
                ("activate", activate.to_string()),
            ]),
        );
        let metadata = fields_of([
            ("bundle_id", bundle_id.clone().unwrap_or_default()),
            ("app_name", app_name.clone().unwrap_or_default()),
            ("activate", activate.to_string()),
        ]);

        let broker = self.deps.broker.clone();
        self.perform(gate, metadata, move |_cancel| async move {
            let output = broker
                .app_command(bundle_id.as_deref(), app_name.as_deref(), &command, activate)
                .await?;
            Ok(ActionReceipt::executed("AppleScript app command executed")
                .with_data("bundle_id", bundle_id.unwrap_or_default())
                .with_data("app_name", app_name.unwrap_or_default())
                .with_data("stdout", output.stdout)
                .with_data("stderr", output.stderr))
        })
        .await
    }

    async fn permissions_status(&self) -> ToolResult<ToolCallResult> {
        let config = self.load_config()?;
        let permissions = &self.deps.adapters.permissions;
        let accessibility = permissions.has_accessibility(false).await;
        let screen_recording = permissions.has_screen_recording(false).await;
        let broker_running = self.deps.broker.health(false).await;
        let identity = self.deps.broker.identity().await;

        Ok(ToolCallResult::ok(
            JsonValue::object([
                ("accessibility", JsonValue::Bool(accessibility)),
                ("screen_recording", JsonValue::Bool(screen_recording)),
                ("broker_running", JsonValue::Bool(broker_running)),
                (
                    "broker_identity",
                    JsonValue::object([
                        ("bundle_id", JsonValue::String(identity.bundle_id)),
                        (
                            "path",
                            JsonValue::String(identity.path.display().to_string()),
                        ),
                        ("signed", JsonValue::Bool(identity.signed)),
                    ]),
                ),
                (
                    "automation_known_targets",
                    JsonValue::string_array(&config.sensitive_bundle_ids),
                ),
            ]),
            "Collected local permission status",
        ))
    }

    async fn permissions_probe_automation(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let bundle_id = args.str("bundle_id");
        let app_name = args.str("app_name");
        if bundle_id.is_none() && app_name.is_none() {
            return Err(ToolError::invalid_params(
                "permissions_probe_automation requires bundle_id or app_name",
            ));
        }

        let probe = self
            .deps
            .broker
            .probe_automation(bundle_id, app_name)
            .await
            .map_err(|err| ToolError::execution_failed(err.to_string()))?;

        let structured = JsonValue::object([
            ("status", JsonValue::from(probe.status.as_str())),
            (
                "error_code",
                probe
                    .error_code
                    .map(|code| JsonValue::from(code.as_str()))
                    .unwrap_or(JsonValue::Null),
            ),
            ("message", JsonValue::from(probe.message.as_str())),
            ("remediation", JsonValue::string_array(&probe.remediation)),
        ]);
        let result = if probe.status == PermissionProbeStatus::Error {
            ToolCallResult::error(structured, probe.message)
        } else {
            ToolCallResult::ok(structured, probe.message)
        };
        Ok(result)
    }

    async fn permissions_open_settings(&self, args: Args<'_>) -> ToolResult<ToolCallResult> {
        let section = args.required_str("section")?.to_string();
        let url = settings_url(&section)?;

        let workspace = self.deps.adapters.workspace.clone();
        let receipt = self
            .deps
            .queue
            .enqueue("permissions_open_settings", move |_cancel| async move {
                workspace.open(&[url.to_string()]).await?;
                Ok(
                    ActionReceipt::executed(format!("Opened System Settings section {section}"))
                        .with_data("section", section),
                )
            })
            .await;

        match receipt {
            Ok(receipt) => Ok(receipt_result(&receipt)),
            Err(err) => automation_failure("permissions_open_settings", err),
        }
    }

    async fn automation_stop(&self) -> ToolResult<ToolCallResult> {
        let queue_cancelled = self.deps.queue.stop_all();
        let broker_cancelled = self.deps.broker.stop_active().await;
        let cancelled = queue_cancelled + broker_cancelled;
        info!(queue_cancelled, broker_cancelled, "automation stopped");

        self.record(
            "automation_stop",
            None,
            ActionStatus::Executed,
            "automation_stop called",
            fields_of([
                ("cancelled_actions", cancelled.to_string()),
                ("queue_cancelled_actions", queue_cancelled.to_string()),
                ("broker_cancelled_actions", broker_cancelled.to_string()),
            ]),
        );

        Ok(ToolCallResult::ok(
            JsonValue::object([
                ("stopped", JsonValue::Bool(true)),
                ("cancelled_actions", JsonValue::from(cancelled)),
                ("queue_cancelled_actions", JsonValue::from(queue_cancelled)),
                ("broker_cancelled_actions", JsonValue::from(broker_cancelled)),
            ]),
            format!("Stopped automation queue; cancelled actions: {cancelled}"),
        ))
    }
}

#[async_trait]
impl ToolExecutor for OperatorToolExecutor {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonValue>,
    ) -> ToolResult<ToolCallResult> {
        let definition = self
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| ToolError::invalid_params(format!("Unknown tool: {name}")))?;

        let violations = definition.input_schema.validate(arguments.as_ref());
        if !violations.is_empty() {
            return Err(ToolError::invalid_params(violations.join("; ")));
        }

        debug!(tool = name, "dispatching tool call");
        let args = Args::new(arguments.as_ref());
        match name {
            "set_safety_mode" => self.set_safety_mode(args).await,
            "update_app_whitelist" => self.update_app_whitelist(args).await,
            "list_windows" => self.list_windows(args).await,
            "focus_window" => self.focus_window(args).await,
            "mouse_move" => self.mouse_move(args).await,
            "mouse_click" => self.mouse_click(args).await,
            "mouse_drag" => self.mouse_drag(args).await,
            "mouse_scroll" => self.mouse_scroll(args).await,
            "text_input" => self.text_input(args).await,
            "key_chord" => self.key_chord(args).await,
            "screen_capture" => self.screen_capture(args).await,
            "app_launch" => self.app_launch(args).await,
            "app_open_url" => self.app_open_url(args).await,
            "app_open_path" => self.app_open_path(args).await,
            "app_quit" => self.app_quit(args).await,
            "applescript_run" => self.applescript_run(args).await,
            "applescript_app_command" => self.applescript_app_command(args).await,
            "permissions_status" => self.permissions_status().await,
            "permissions_probe_automation" => self.permissions_probe_automation(args).await,
            "permissions_open_settings" => self.permissions_open_settings(args).await,
            "automation_stop" => self.automation_stop().await,
            other => Err(ToolError::invalid_params(format!(
                "Tool not implemented: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ScriptOutput;
    use crate::types::PermissionErrorCode;

    #[test]
    fn quality_resolution() {
        assert_eq!(capture_quality(Some("jpeg"), None), Some(0.7));
        assert_eq!(capture_quality(Some("jpeg"), Some(0.3)), Some(0.3));
        assert_eq!(capture_quality(Some("png"), Some(0.3)), None);
        assert_eq!(capture_quality(None, Some(0.9)), Some(0.9));
        assert_eq!(capture_quality(None, None), Some(0.7));
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("https://example.com"));
        assert!(has_scheme("mailto:someone@example.com"));
        assert!(has_scheme("x-apple.systempreferences:com.apple.preference.security"));
        assert!(!has_scheme("example.com"));
        assert!(!has_scheme("://nothing"));
        assert!(!has_scheme("1http://bad"));
    }

    #[test]
    fn open_args_prefer_bundle_over_name() {
        assert_eq!(open_args(false, Some("com.apple.Notes"), Some("Notes")), [
            "-g",
            "-b",
            "com.apple.Notes"
        ]);
        assert_eq!(open_args(true, None, Some("Notes")), ["-a", "Notes"]);
        assert!(open_args(true, None, None).is_empty());
    }

    #[test]
    fn script_failures_with_output_become_error_results() {
        let err = AutomationError::Broker(BrokerClientError {
            code: PermissionErrorCode::ExecFailed,
            message: "osascript failed with status 1".into(),
            output: Some(ScriptOutput {
                stdout: "partial".into(),
                stderr: "boom".into(),
            }),
        });
        let result = automation_failure("applescript_run", err).unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.structured_content.get("stdout").and_then(JsonValue::as_str),
            Some("partial")
        );
        assert_eq!(
            result.structured_content.get("error_code").and_then(JsonValue::as_str),
            Some("EXEC_FAILED")
        );

        let err = AutomationError::Broker(BrokerClientError::new(
            PermissionErrorCode::BrokerUnavailable,
            "gone",
        ));
        let err = automation_failure("applescript_run", err).unwrap_err();
        assert_eq!(err, ToolError::execution_failed("BROKER_UNAVAILABLE: gone"));
    }

    #[test]
    fn unknown_settings_section() {
        assert!(settings_url("network").is_err());
        assert_eq!(settings_url("automation").unwrap(), SETTINGS_AUTOMATION);
    }
}
