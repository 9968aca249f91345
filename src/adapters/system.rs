//! Adapters backed by the stock macOS command-line tools
//!
//! Window queries and focus go through `osascript` and System Events, capture
//! through `screencapture`, launch services through `open`, and the clipboard
//! through `pbcopy`. Synthetic input events need CoreGraphics and are not
//! available here; [`UnsupportedEventSink`] reports that explicitly.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use super::input::{Clipboard, EventSink, Modifiers, MouseEventKind};
use super::{
    AdapterError, AdapterResult, CaptureAdapter, PermissionChecker, WindowAdapter,
    WorkspaceAdapter,
};
use crate::broker::script::quote_applescript;
use crate::types::{CaptureRegion, CaptureResult, MouseButton, WindowDescriptor, WindowFrame};

const OSASCRIPT: &str = "/usr/bin/osascript";
const OPEN: &str = "/usr/bin/open";
const PBCOPY: &str = "/usr/bin/pbcopy";
const SCREENCAPTURE: &str = "/usr/sbin/screencapture";

const ACCESSIBILITY_SETTINGS_URL: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility";

/// Run a program to completion and return its trimmed stdout.
async fn run(program: &str, args: &[&str], input: Option<&str>) -> AdapterResult<String> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|err| AdapterError::failed(format!("failed to launch {program}: {err}")))?;

    if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|err| AdapterError::failed(format!("failed to write to {program}: {err}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|err| AdapterError::failed(format!("failed to wait for {program}: {err}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(AdapterError::Failed(if stderr.is_empty() {
        format!(
            "{program} failed with status {}",
            output.status.code().unwrap_or(-1)
        )
    } else {
        stderr
    }))
}

async fn osascript(script: &str) -> AdapterResult<String> {
    run(OSASCRIPT, &[], Some(script)).await
}

/// Clipboard writer using `pbcopy`.
#[derive(Debug, Default, Clone)]
pub struct PbcopyClipboard;

#[async_trait]
impl Clipboard for PbcopyClipboard {
    async fn set_text(&self, text: &str) -> AdapterResult<()> {
        run(PBCOPY, &[], Some(text))
            .await
            .map(|_| ())
            .map_err(|err| AdapterError::failed(format!("Unable to write text into pasteboard: {err}")))
    }
}

/// Event sink for hosts without an event-injection backend.
#[derive(Debug, Default, Clone)]
pub struct UnsupportedEventSink;

impl UnsupportedEventSink {
    fn unsupported<T>(&self) -> AdapterResult<T> {
        Err(AdapterError::Unsupported(
            "synthetic input events require a CoreGraphics event backend".into(),
        ))
    }
}

impl EventSink for UnsupportedEventSink {
    fn cursor_position(&self) -> AdapterResult<(f64, f64)> {
        self.unsupported()
    }

    fn post_mouse(
        &self,
        _kind: MouseEventKind,
        _point: (f64, f64),
        _button: MouseButton,
    ) -> AdapterResult<()> {
        self.unsupported()
    }

    fn post_scroll(&self, _delta_x: f64, _delta_y: f64) -> AdapterResult<()> {
        self.unsupported()
    }

    fn post_key(&self, _key_code: u16, _down: bool, _modifiers: Modifiers) -> AdapterResult<()> {
        self.unsupported()
    }

    fn post_char(&self, _ch: char) -> AdapterResult<()> {
        self.unsupported()
    }
}

// One tab-separated line per window:
// bundle, app, title, x, y, width, height, minimized, frontmost
const LIST_WINDOWS_SCRIPT: &str = r#"set out to ""
tell application "System Events"
    repeat with p in (application processes whose background only is false)
        set bid to ""
        try
            set bid to bundle identifier of p
        end try
        set pname to name of p
        set isFront to frontmost of p
        repeat with w in windows of p
            set t to ""
            try
                set t to name of w
            end try
            set {px, py} to position of w
            set {sw, sh} to size of w
            set mini to false
            try
                set mini to value of attribute "AXMinimized" of w
            end try
            set out to out & bid & tab & pname & tab & t & tab & px & tab & py & tab & sw & tab & sh & tab & mini & tab & isFront & linefeed
        end repeat
    end repeat
end tell
return out"#;

/// Parse the window listing emitted by the System Events script.
///
/// Window ids are assigned by position in the listing, starting at 1, counted
/// over every window including minimized ones so ids stay stable across the
/// `include_minimized` flag.
pub fn parse_window_listing(listing: &str, include_minimized: bool) -> Vec<WindowDescriptor> {
    let mut windows = Vec::new();
    let mut next_id = 0u32;
    for line in listing.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            continue;
        }
        next_id += 1;
        let number = |raw: &str| raw.trim().parse::<f64>().unwrap_or(0.0);
        let minimized = fields[7].trim() == "true";
        if minimized && !include_minimized {
            continue;
        }
        let bundle_id = Some(fields[0].trim())
            .filter(|b| !b.is_empty() && *b != "missing value")
            .map(str::to_string);
        windows.push(WindowDescriptor {
            window_id: next_id,
            bundle_id,
            app_name: fields[1].to_string(),
            title: fields[2].to_string(),
            frame: WindowFrame {
                x: number(fields[3]),
                y: number(fields[4]),
                width: number(fields[5]),
                height: number(fields[6]),
            },
            is_focused: fields[8].trim() == "true",
        });
    }
    windows
}

/// Window adapter driven through System Events.
#[derive(Debug, Default, Clone)]
pub struct SystemEventsWindows;

impl SystemEventsWindows {
    async fn is_running(&self, bundle_id: &str) -> bool {
        let script = format!("application id {} is running", quote_applescript(bundle_id));
        matches!(osascript(&script).await.as_deref(), Ok("true"))
    }

    async fn activate(&self, bundle_id: &str, activate_all_windows: bool) -> AdapterResult<()> {
        let target = quote_applescript(bundle_id);
        let script = if activate_all_windows {
            format!("tell application id {target}\n    reopen\n    activate\nend tell")
        } else {
            format!("tell application id {target} to activate")
        };
        osascript(&script).await.map(|_| ())
    }
}

#[async_trait]
impl WindowAdapter for SystemEventsWindows {
    async fn list_windows(&self, include_minimized: bool) -> Vec<WindowDescriptor> {
        match osascript(LIST_WINDOWS_SCRIPT).await {
            Ok(listing) => parse_window_listing(&listing, include_minimized),
            Err(err) => {
                debug!(error = %err, "window listing failed");
                Vec::new()
            }
        }
    }

    async fn focus_window(
        &self,
        window_id: Option<u32>,
        bundle_id: Option<&str>,
        launch_if_needed: bool,
        activate_all_windows: bool,
    ) -> AdapterResult<Option<String>> {
        if let Some(bundle_id) = bundle_id {
            if !self.is_running(bundle_id).await {
                if !launch_if_needed {
                    return Err(AdapterError::failed(format!("App {bundle_id} is not running")));
                }
                run(OPEN, &["-b", bundle_id], None).await.map_err(|err| {
                    AdapterError::failed(format!("Cannot launch {bundle_id}: {err}"))
                })?;
            }
            self.activate(bundle_id, activate_all_windows).await?;
            return Ok(Some(bundle_id.to_string()));
        }

        let window_id = window_id
            .ok_or_else(|| AdapterError::failed("Either window_id or bundle_id is required"))?;
        let windows = self.list_windows(true).await;
        let window = windows
            .iter()
            .find(|w| w.window_id == window_id)
            .ok_or_else(|| AdapterError::failed(format!("Window {window_id} was not found")))?;
        let bundle_id = window.bundle_id.clone().ok_or_else(|| {
            AdapterError::failed(format!("Bundle ID unavailable for window {window_id}"))
        })?;
        self.activate(&bundle_id, activate_all_windows).await?;
        Ok(Some(bundle_id))
    }

    async fn frontmost_bundle_id(&self) -> Option<String> {
        let script = "tell application \"System Events\" to get bundle identifier of first application process whose frontmost is true";
        osascript(script)
            .await
            .ok()
            .filter(|id| !id.is_empty() && id != "missing value")
    }
}

/// Read pixel dimensions from a PNG or JPEG header.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if bytes.starts_with(PNG_SIGNATURE) {
        let width = u32::from_be_bytes(bytes.get(16..20)?.try_into().ok()?);
        let height = u32::from_be_bytes(bytes.get(20..24)?.try_into().ok()?);
        return Some((width, height));
    }

    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut offset = 2;
    while offset + 4 <= bytes.len() {
        if bytes[offset] != 0xFF {
            offset += 1;
            continue;
        }
        let marker = bytes[offset + 1];
        if marker == 0xFF {
            offset += 1;
            continue;
        }
        let length = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
        let is_frame = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            let header = bytes.get(offset + 5..offset + 9)?;
            let height = u16::from_be_bytes([header[0], header[1]]) as u32;
            let width = u16::from_be_bytes([header[2], header[3]]) as u32;
            return Some((width, height));
        }
        offset += 2 + length;
    }
    None
}

/// Capture adapter using `screencapture`.
#[derive(Debug, Clone)]
pub struct ScreencaptureAdapter {
    scratch_dir: PathBuf,
}

impl Default for ScreencaptureAdapter {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
        }
    }
}

#[async_trait]
impl CaptureAdapter for ScreencaptureAdapter {
    async fn capture(
        &self,
        region: Option<CaptureRegion>,
        quality: Option<f64>,
    ) -> AdapterResult<CaptureResult> {
        let (format, extension) = if quality.is_some() {
            ("jpeg", "jpg")
        } else {
            ("png", "png")
        };
        let path = self
            .scratch_dir
            .join(format!("capture-{}.{extension}", Uuid::new_v4()));
        let path_arg = path.display().to_string();

        let mut args = vec!["-x".to_string(), "-t".to_string(), extension.to_string()];
        if let Some(region) = region {
            args.push("-R".into());
            args.push(format!(
                "{},{},{},{}",
                region.x.round(),
                region.y.round(),
                region.width.round(),
                region.height.round()
            ));
        }
        args.push(path_arg);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        run(SCREENCAPTURE, &arg_refs, None)
            .await
            .map_err(|err| AdapterError::failed(format!("Failed to capture screen: {err}")))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| AdapterError::failed(format!("Failed to read capture: {err}")))?;
        let _ = tokio::fs::remove_file(&path).await;

        let (width, height) = image_dimensions(&bytes)
            .ok_or_else(|| AdapterError::failed("Failed to decode capture dimensions"))?;

        Ok(CaptureResult {
            image_base64: BASE64.encode(&bytes),
            format: format.to_string(),
            width,
            height,
        })
    }
}

/// Permission checker that probes through the scripting tools.
#[derive(Debug, Default, Clone)]
pub struct CommandPermissionChecker;

impl CommandPermissionChecker {
    async fn ui_scripting_enabled(&self) -> bool {
        matches!(
            osascript("tell application \"System Events\" to get UI elements enabled")
                .await
                .as_deref(),
            Ok("true")
        )
    }
}

#[async_trait]
impl PermissionChecker for CommandPermissionChecker {
    async fn has_accessibility(&self, prompt: bool) -> bool {
        if self.ui_scripting_enabled().await {
            return true;
        }
        if prompt {
            let _ = run(OPEN, &[ACCESSIBILITY_SETTINGS_URL], None).await;
        }
        false
    }

    async fn has_screen_recording(&self, _prompt: bool) -> bool {
        // screencapture triggers the system prompt itself on first use
        let path = std::env::temp_dir().join(format!("permission-{}.png", Uuid::new_v4()));
        let path_arg = path.display().to_string();
        let granted = run(SCREENCAPTURE, &["-x", "-t", "png", &path_arg], None)
            .await
            .is_ok();
        let _ = tokio::fs::remove_file(&path).await;
        granted
    }
}

/// Launch services through `open` and AppleScript `quit`.
#[derive(Debug, Default, Clone)]
pub struct OpenWorkspace;

#[async_trait]
impl WorkspaceAdapter for OpenWorkspace {
    async fn open(&self, args: &[String]) -> AdapterResult<()> {
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(args = ?args, "running open");
        run(OPEN, &arg_refs, None).await.map(|_| ())
    }

    async fn quit_app(&self, bundle_id: &str) -> AdapterResult<usize> {
        let target = quote_applescript(bundle_id);
        let count_script = format!(
            "tell application \"System Events\" to count (every application process whose bundle identifier is {target})"
        );
        let running = osascript(&count_script)
            .await?
            .parse::<usize>()
            .unwrap_or(0);
        if running == 0 {
            return Ok(0);
        }
        osascript(&format!("tell application id {target} to quit")).await?;
        Ok(running)
    }
}
