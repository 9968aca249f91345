//! Tool executor behavior over fake adapters, a fake broker and a temporary
//! config/audit directory.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use macos_mcp_operator::adapters::{
    AdapterResult, CaptureAdapter, InputAdapter, PermissionChecker, WindowAdapter,
    WorkspaceAdapter,
};
use macos_mcp_operator::audit::AuditLogger;
use macos_mcp_operator::automation::AutomationQueue;
use macos_mcp_operator::broker::{
    BrokerApi, BrokerClientError, BrokerIdentity, BrokerResult, ScriptOutput,
};
use macos_mcp_operator::config::ConfigStore;
use macos_mcp_operator::mcp::{JsonValue, ToolCallResult, ToolError, ToolExecutor, ToolResult};
use macos_mcp_operator::operator::{OperatorAdapters, OperatorDeps, OperatorToolExecutor};
use macos_mcp_operator::safety::{SafetyDecision, SafetyEngine, SafetyPolicy, SafetyRequest};
use macos_mcp_operator::types::{
    CaptureRegion, CaptureResult, MouseButton, PermissionErrorCode, PermissionProbeResult,
    PermissionProbeStatus, SafetyMode, TextInputMode, WindowDescriptor, WindowFrame,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingInput {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl InputAdapter for RecordingInput {
    async fn move_mouse(
        &self,
        x: f64,
        y: f64,
        _duration_ms: i64,
        _cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.calls.lock().push(format!("move {x},{y}"));
        Ok(())
    }

    async fn click_mouse(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: i64,
        _cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.calls
            .lock()
            .push(format!("click {x},{y} {} x{click_count}", button.as_str()));
        Ok(())
    }

    async fn drag_mouse(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        _duration_ms: i64,
        _cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.calls
            .lock()
            .push(format!("drag {},{} -> {},{}", from.0, from.1, to.0, to.1));
        Ok(())
    }

    async fn scroll(
        &self,
        delta_x: f64,
        delta_y: f64,
        _cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.calls.lock().push(format!("scroll {delta_x},{delta_y}"));
        Ok(())
    }

    async fn text_input(
        &self,
        text: &str,
        mode: TextInputMode,
        _cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.calls
            .lock()
            .push(format!("text {} {text}", mode.as_str()));
        Ok(())
    }

    async fn key_chord(
        &self,
        keys: &[String],
        repeat: i64,
        _cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.calls
            .lock()
            .push(format!("chord {} x{repeat}", keys.join("+")));
        Ok(())
    }
}

struct FakeWindows {
    windows: Vec<WindowDescriptor>,
    frontmost: Mutex<Option<String>>,
    focus_calls: Mutex<Vec<Option<String>>>,
}

impl FakeWindows {
    fn new(frontmost: &str) -> Self {
        let window = |id: u32, bundle: &str, app: &str| WindowDescriptor {
            window_id: id,
            bundle_id: Some(bundle.to_string()),
            app_name: app.to_string(),
            title: format!("{app} window"),
            frame: WindowFrame {
                x: 0.0,
                y: 0.0,
                width: 800.0,
                height: 600.0,
            },
            is_focused: bundle == frontmost,
        };
        Self {
            windows: vec![
                window(0, "com.apple.Notes", "Notes"),
                window(1, "com.apple.Safari", "Safari"),
            ],
            frontmost: Mutex::new(Some(frontmost.to_string())),
            focus_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WindowAdapter for FakeWindows {
    async fn list_windows(&self, _include_minimized: bool) -> Vec<WindowDescriptor> {
        self.windows.clone()
    }

    async fn focus_window(
        &self,
        window_id: Option<u32>,
        bundle_id: Option<&str>,
        _launch_if_needed: bool,
        _activate_all_windows: bool,
    ) -> AdapterResult<Option<String>> {
        let bundle = bundle_id.map(str::to_string).or_else(|| {
            window_id.and_then(|id| {
                self.windows
                    .iter()
                    .find(|window| window.window_id == id)
                    .and_then(|window| window.bundle_id.clone())
            })
        });
        self.focus_calls.lock().push(bundle.clone());
        *self.frontmost.lock() = bundle.clone();
        Ok(bundle)
    }

    async fn frontmost_bundle_id(&self) -> Option<String> {
        self.frontmost.lock().clone()
    }
}

#[derive(Default)]
struct FakeCapture {
    requests: Mutex<Vec<(Option<CaptureRegion>, Option<f64>)>>,
}

#[async_trait]
impl CaptureAdapter for FakeCapture {
    async fn capture(
        &self,
        region: Option<CaptureRegion>,
        quality: Option<f64>,
    ) -> AdapterResult<CaptureResult> {
        self.requests.lock().push((region, quality));
        Ok(CaptureResult {
            image_base64: "aW1hZ2U=".to_string(),
            format: if quality.is_some() { "jpeg" } else { "png" }.to_string(),
            width: 640,
            height: 480,
        })
    }
}

struct FakePermissions {
    accessibility: bool,
    screen_recording: bool,
}

#[async_trait]
impl PermissionChecker for FakePermissions {
    async fn has_accessibility(&self, _prompt: bool) -> bool {
        self.accessibility
    }

    async fn has_screen_recording(&self, _prompt: bool) -> bool {
        self.screen_recording
    }
}

#[derive(Default)]
struct FakeWorkspace {
    opened: Mutex<Vec<Vec<String>>>,
    running: usize,
}

#[async_trait]
impl WorkspaceAdapter for FakeWorkspace {
    async fn open(&self, args: &[String]) -> AdapterResult<()> {
        self.opened.lock().push(args.to_vec());
        Ok(())
    }

    async fn quit_app(&self, _bundle_id: &str) -> AdapterResult<usize> {
        Ok(self.running)
    }
}

struct FakeBroker {
    stopped: usize,
}

#[async_trait]
impl BrokerApi for FakeBroker {
    async fn run_applescript(
        &self,
        script: &str,
        _target_bundle_id: Option<&str>,
    ) -> BrokerResult<ScriptOutput> {
        if script.contains("error") {
            return Err(BrokerClientError {
                code: PermissionErrorCode::ExecFailed,
                message: "execution error: boom (-2700)".to_string(),
                output: Some(ScriptOutput {
                    stdout: "partial".to_string(),
                    stderr: "execution error: boom (-2700)".to_string(),
                }),
            });
        }
        Ok(ScriptOutput {
            stdout: "42".to_string(),
            stderr: String::new(),
        })
    }

    async fn app_command(
        &self,
        _bundle_id: Option<&str>,
        _app_name: Option<&str>,
        _command: &str,
        _activate: bool,
    ) -> BrokerResult<ScriptOutput> {
        Err(BrokerClientError::new(
            PermissionErrorCode::BrokerUnavailable,
            "Broker is unavailable",
        ))
    }

    async fn probe_automation(
        &self,
        _bundle_id: Option<&str>,
        _app_name: Option<&str>,
    ) -> BrokerResult<PermissionProbeResult> {
        Ok(PermissionProbeResult {
            status: PermissionProbeStatus::Denied,
            error_code: Some(PermissionErrorCode::AutomationNotAllowed),
            message: "Automation permission denied".to_string(),
            remediation: vec!["Open System Settings".to_string()],
        })
    }

    async fn health(&self, _autostart: bool) -> bool {
        true
    }

    async fn stop_active(&self) -> usize {
        self.stopped
    }

    async fn identity(&self) -> BrokerIdentity {
        BrokerIdentity {
            bundle_id: "com.example.broker".to_string(),
            path: PathBuf::from("/Applications/Broker.app"),
            signed: false,
        }
    }
}

struct RejectEverything;

impl SafetyPolicy for RejectEverything {
    fn evaluate(&self, request: &SafetyRequest<'_>) -> SafetyDecision {
        SafetyDecision::Reject(format!("{} blocked by policy", request.tool))
    }
}

struct Fixture {
    dir: TempDir,
    executor: OperatorToolExecutor,
    input: Arc<RecordingInput>,
    windows: Arc<FakeWindows>,
    capture: Arc<FakeCapture>,
    workspace: Arc<FakeWorkspace>,
}

struct Options {
    accessibility: bool,
    screen_recording: bool,
    running_apps: usize,
    safety: Option<Arc<dyn SafetyPolicy>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            accessibility: true,
            screen_recording: true,
            running_apps: 1,
            safety: None,
        }
    }
}

fn fixture(options: Options) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = Arc::new(RecordingInput::default());
    let windows = Arc::new(FakeWindows::new("com.apple.Notes"));
    let capture = Arc::new(FakeCapture::default());
    let workspace = Arc::new(FakeWorkspace {
        running: options.running_apps,
        ..FakeWorkspace::default()
    });

    let deps = OperatorDeps {
        config: Arc::new(ConfigStore::new(dir.path().join("config.json"))),
        audit: Arc::new(AuditLogger::new(true, dir.path().join("audit.jsonl"))),
        safety: options
            .safety
            .unwrap_or_else(|| Arc::new(SafetyEngine::new(SafetyMode::Restricted, &[]))),
        queue: AutomationQueue::new(),
        broker: Arc::new(FakeBroker { stopped: 2 }),
        adapters: OperatorAdapters {
            input: input.clone(),
            windows: windows.clone(),
            capture: capture.clone(),
            permissions: Arc::new(FakePermissions {
                accessibility: options.accessibility,
                screen_recording: options.screen_recording,
            }),
            workspace: workspace.clone(),
        },
    };

    Fixture {
        dir,
        executor: OperatorToolExecutor::new(deps),
        input,
        windows,
        capture,
        workspace,
    }
}

impl Fixture {
    async fn call(&self, tool: &str, arguments: &str) -> ToolResult<ToolCallResult> {
        let arguments = JsonValue::parse(arguments).expect("test arguments");
        self.executor.call_tool(tool, Some(arguments)).await
    }

    fn audit_lines(&self) -> Vec<serde_json::Value> {
        match std::fs::read_to_string(self.dir.path().join("audit.jsonl")) {
            Ok(contents) => contents
                .lines()
                .map(|line| serde_json::from_str(line).expect("audit line"))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn text_of<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(JsonValue::as_str)
}

#[tokio::test]
async fn catalog_is_complete() {
    let fx = fixture(Options::default());
    let names: Vec<String> = fx
        .executor
        .list_tools()
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    assert_eq!(names.len(), 21);
    for expected in [
        "set_safety_mode",
        "list_windows",
        "mouse_click",
        "screen_capture",
        "applescript_run",
        "permissions_open_settings",
        "automation_stop",
    ] {
        assert!(names.iter().any(|name| name == expected), "{expected}");
    }
}

#[tokio::test]
async fn unknown_tools_and_bad_arguments_are_invalid_params() {
    let fx = fixture(Options::default());

    let err = fx.call("teleport", "{}").await.unwrap_err();
    assert_eq!(err, ToolError::invalid_params("Unknown tool: teleport"));

    let err = fx.call("mouse_move", r#"{"x":"left"}"#).await.unwrap_err();
    match err {
        ToolError::InvalidParams(message) => {
            assert!(message.contains("missing required field: y"), "{message}");
            assert!(message.contains("field 'x' expected"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = fx
        .call("mouse_click", r#"{"x":1,"y":2,"window_id":-1}"#)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::invalid_params("window_id must be a non-negative 32-bit integer")
    );
    assert!(fx.input.calls.lock().is_empty());
}

#[tokio::test]
async fn text_input_runs_and_audits_with_redaction() {
    let fx = fixture(Options::default());
    let result = fx
        .call("text_input", r#"{"text":"hunter2","mode":"paste"}"#)
        .await
        .expect("text input");

    assert!(!result.is_error);
    assert_eq!(text_of(&result.structured_content, &["status"]), Some("executed"));
    assert_eq!(result.text, "Text input executed");
    assert_eq!(*fx.input.calls.lock(), vec!["text paste hunter2".to_string()]);

    let lines = fx.audit_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["tool"], "text_input");
    assert_eq!(lines[0]["targetBundleID"], "com.apple.Notes");
    assert_eq!(lines[0]["metadata"]["text"], "[REDACTED]");
    assert_eq!(lines[0]["metadata"]["mode"], "paste");
}

#[tokio::test]
async fn input_requires_accessibility() {
    let fx = fixture(Options {
        accessibility: false,
        ..Options::default()
    });
    let err = fx.call("mouse_move", r#"{"x":1,"y":2}"#).await.unwrap_err();
    match err {
        ToolError::ExecutionFailed(message) => {
            assert!(message.starts_with("ACCESSIBILITY_MISSING"), "{message}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fx.input.calls.lock().is_empty());
}

#[tokio::test]
async fn background_target_needs_auto_focus() {
    let fx = fixture(Options::default());

    let err = fx
        .call("mouse_click", r#"{"x":10,"y":20,"bundle_id":"com.apple.Safari"}"#)
        .await
        .unwrap_err();
    match err {
        ToolError::ExecutionFailed(message) => {
            assert!(message.starts_with("TARGET_NOT_FRONTMOST: com.apple.Safari"), "{message}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fx.input.calls.lock().is_empty());

    let result = fx
        .call(
            "mouse_click",
            r#"{"x":10,"y":20,"window_id":1,"auto_focus":true,"button":"right","click_count":2}"#,
        )
        .await
        .expect("focused click");
    assert_eq!(result.text, "Mouse click executed");
    assert_eq!(
        *fx.windows.focus_calls.lock(),
        vec![Some("com.apple.Safari".to_string())]
    );
    assert_eq!(*fx.input.calls.lock(), vec!["click 10,20 right x2".to_string()]);
    assert_eq!(fx.audit_lines()[0]["targetBundleID"], "com.apple.Safari");
}

#[tokio::test]
async fn unknown_window_cannot_be_targeted() {
    let fx = fixture(Options::default());
    let err = fx
        .call("mouse_scroll", r#"{"delta_x":0,"delta_y":-3,"window_id":9}"#)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::execution_failed(
            "TARGET_UNRESOLVED: unable to resolve target bundle for mouse_scroll"
        )
    );
}

#[tokio::test]
async fn frontmost_target_skips_focus() {
    let fx = fixture(Options::default());
    fx.call("key_chord", r#"{"keys":["CMD","s"],"window_id":0}"#)
        .await
        .expect("chord");
    assert!(fx.windows.focus_calls.lock().is_empty());
    assert_eq!(*fx.input.calls.lock(), vec!["chord CMD+s x1".to_string()]);
    assert_eq!(fx.audit_lines()[0]["metadata"]["keys"], "cmd+s");
}

#[tokio::test]
async fn safety_rejection_stops_before_the_queue() {
    let fx = fixture(Options {
        safety: Some(Arc::new(RejectEverything)),
        ..Options::default()
    });
    let result = fx
        .call("mouse_move", r#"{"x":1,"y":2}"#)
        .await
        .expect("rejection result");
    assert!(result.is_error);
    assert_eq!(text_of(&result.structured_content, &["status"]), Some("rejected"));
    assert_eq!(result.text, "mouse_move blocked by policy");
    assert!(fx.input.calls.lock().is_empty());
    assert!(fx.audit_lines().is_empty());
}

#[tokio::test]
async fn script_output_is_reported_on_success_and_failure() {
    let fx = fixture(Options::default());

    let ok = fx
        .call("applescript_run", r#"{"script":"return 42","target_bundle_id":"com.apple.Notes"}"#)
        .await
        .expect("script");
    assert_eq!(text_of(&ok.structured_content, &["data", "stdout"]), Some("42"));
    assert_eq!(ok.text, "AppleScript executed");

    let failed = fx
        .call("applescript_run", r#"{"script":"error \"boom\""}"#)
        .await
        .expect("failure is a result");
    assert!(failed.is_error);
    assert_eq!(text_of(&failed.structured_content, &["error_code"]), Some("EXEC_FAILED"));
    assert_eq!(text_of(&failed.structured_content, &["stdout"]), Some("partial"));
    assert_eq!(failed.text, "EXEC_FAILED: execution error: boom (-2700)");

    let unavailable = fx
        .call("applescript_app_command", r#"{"app_name":"Notes","command":"make new note"}"#)
        .await
        .unwrap_err();
    assert_eq!(
        unavailable,
        ToolError::execution_failed("BROKER_UNAVAILABLE: Broker is unavailable")
    );
}

#[tokio::test]
async fn deprecated_tools_are_no_ops() {
    let fx = fixture(Options::default());

    let result = fx
        .call("set_safety_mode", r#"{"mode":"full_auto","persist":true}"#)
        .await
        .expect("no-op");
    assert_eq!(text_of(&result.structured_content, &["mode"]), Some("restricted"));
    assert_eq!(
        text_of(&result.structured_content, &["requested_mode"]),
        Some("full_auto")
    );
    assert_eq!(
        result.structured_content.get("deprecated"),
        Some(&JsonValue::Bool(true))
    );

    let result = fx
        .call(
            "update_app_whitelist",
            r#"{"operation":"add","bundle_ids":["com.apple.Safari"]}"#,
        )
        .await
        .expect("no-op");
    let whitelist = result
        .structured_content
        .get("effective_whitelist")
        .and_then(JsonValue::as_array)
        .expect("whitelist");
    assert_eq!(whitelist, &[JsonValue::from("com.apple.Notes")]);

    let persisted = std::fs::read_to_string(fx.dir.path().join("config.json")).expect("config");
    assert!(!persisted.contains("com.apple.Safari"));
    assert!(!persisted.contains("full_auto"));
}

#[tokio::test]
async fn screen_capture_attaches_image_or_reports_permission() {
    let fx = fixture(Options::default());
    let result = fx
        .call(
            "screen_capture",
            r#"{"format":"jpeg","region":{"x":0,"y":0,"width":100,"height":50}}"#,
        )
        .await
        .expect("capture");
    let image = result.image.expect("image");
    assert_eq!(image.mime_type, "image/jpeg");
    assert_eq!(image.base64, "aW1hZ2U=");
    assert_eq!(result.text, "Captured screen image 640x480");
    let (region, quality) = fx.capture.requests.lock()[0];
    assert_eq!(quality, Some(0.7));
    assert_eq!(region.map(|r| r.width), Some(100.0));

    let denied = fixture(Options {
        screen_recording: false,
        ..Options::default()
    });
    let result = denied.call("screen_capture", "{}").await.expect("result");
    assert!(result.is_error);
    assert!(result.text.starts_with("SCREEN_RECORDING_MISSING"));
    assert!(result.image.is_none());
    assert!(denied.capture.requests.lock().is_empty());
}

#[tokio::test]
async fn app_launch_and_urls_use_open() {
    let fx = fixture(Options::default());

    fx.call("app_launch", r#"{"bundle_id":"com.apple.Notes","app_name":"Notes"}"#)
        .await
        .expect("launch");
    fx.call("app_open_url", r#"{"url":"https://example.com","activate":true}"#)
        .await
        .expect("url");
    let err = fx
        .call("app_open_url", r#"{"url":"example.com"}"#)
        .await
        .unwrap_err();
    assert_eq!(err, ToolError::invalid_params("url must be an absolute URL"));

    let err = fx
        .call("app_open_path", r#"{"path":"/definitely/not/here"}"#)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::invalid_params("path does not exist: /definitely/not/here")
    );

    assert_eq!(
        *fx.workspace.opened.lock(),
        vec![
            vec!["-g".to_string(), "-b".to_string(), "com.apple.Notes".to_string()],
            vec!["https://example.com".to_string()],
        ]
    );
}

#[tokio::test]
async fn quitting_an_app_that_is_not_running_fails() {
    let fx = fixture(Options {
        running_apps: 0,
        ..Options::default()
    });
    let err = fx
        .call("app_quit", r#"{"bundle_id":"com.apple.Notes"}"#)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::execution_failed("No running app found for bundle id com.apple.Notes")
    );
}

#[tokio::test]
async fn permission_tools() {
    let fx = fixture(Options::default());

    let status = fx.call("permissions_status", "{}").await.expect("status");
    assert_eq!(
        status.structured_content.get("broker_running"),
        Some(&JsonValue::Bool(true))
    );
    assert_eq!(
        text_of(&status.structured_content, &["broker_identity", "bundle_id"]),
        Some("com.example.broker")
    );

    let probe = fx
        .call("permissions_probe_automation", r#"{"bundle_id":"com.apple.Notes"}"#)
        .await
        .expect("probe");
    assert!(!probe.is_error);
    assert_eq!(text_of(&probe.structured_content, &["status"]), Some("denied"));
    assert_eq!(
        text_of(&probe.structured_content, &["error_code"]),
        Some("AUTOMATION_NOT_ALLOWED")
    );

    let opened = fx
        .call("permissions_open_settings", r#"{"section":"screen_recording"}"#)
        .await
        .expect("settings");
    assert_eq!(opened.text, "Opened System Settings section screen_recording");
    assert_eq!(
        fx.workspace.opened.lock().last().cloned(),
        Some(vec![
            "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenCapture"
                .to_string()
        ])
    );
}

#[tokio::test]
async fn automation_stop_counts_queue_and_broker() {
    let fx = fixture(Options::default());
    let result = fx.call("automation_stop", "{}").await.expect("stop");

    assert_eq!(
        result
            .structured_content
            .get("cancelled_actions")
            .and_then(JsonValue::as_i64),
        Some(2)
    );
    assert_eq!(
        result
            .structured_content
            .get("broker_cancelled_actions")
            .and_then(JsonValue::as_i64),
        Some(2)
    );
    assert_eq!(result.text, "Stopped automation queue; cancelled actions: 2");
    assert_eq!(fx.audit_lines()[0]["tool"], "automation_stop");
}
