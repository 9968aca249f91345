//! OS adapter seams
//!
//! The tool executor talks to the desktop only through the traits in this
//! module. Shipped implementations live in [`input`] (event-driven mouse and
//! keyboard behavior over an [`input::EventSink`]) and [`system`] (adapters
//! backed by the stock macOS command-line tools). Tests substitute their own.

pub mod input;
pub mod system;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{CaptureRegion, CaptureResult, MouseButton, TextInputMode, WindowDescriptor};

pub use input::{Clipboard, EventDrivenInput, EventSink, KeyChord, Modifiers, MouseEventKind};
pub use system::{
    CommandPermissionChecker, OpenWorkspace, PbcopyClipboard, ScreencaptureAdapter,
    SystemEventsWindows, UnsupportedEventSink,
};

/// Failure raised by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The cancellation token fired between steps
    #[error("adapter operation was cancelled")]
    Cancelled,

    /// The host cannot perform this operation
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The operation was attempted and failed
    #[error("{0}")]
    Failed(String),
}

impl AdapterError {
    /// Convenience constructor for [`AdapterError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        AdapterError::Failed(message.into())
    }
}

/// Result alias for adapter calls
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Return [`AdapterError::Cancelled`] once `cancel` has fired.
pub fn check_cancelled(cancel: &CancellationToken) -> AdapterResult<()> {
    if cancel.is_cancelled() {
        Err(AdapterError::Cancelled)
    } else {
        Ok(())
    }
}

/// Mouse and keyboard injection.
///
/// Every call may be cancelled mid-sequence through `cancel`.
#[async_trait]
pub trait InputAdapter: Send + Sync {
    /// Move the cursor, interpolating over `duration_ms`
    async fn move_mouse(
        &self,
        x: f64,
        y: f64,
        duration_ms: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;

    /// Click `click_count` times at a point
    async fn click_mouse(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;

    /// Press at `from`, interpolate to `to`, release
    async fn drag_mouse(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        duration_ms: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;

    /// Scroll by pixel deltas
    async fn scroll(&self, delta_x: f64, delta_y: f64, cancel: &CancellationToken)
    -> AdapterResult<()>;

    /// Enter text
    async fn text_input(
        &self,
        text: &str,
        mode: TextInputMode,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;

    /// Press a key chord `repeat` times
    async fn key_chord(
        &self,
        keys: &[String],
        repeat: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;
}

/// Window enumeration and focus.
#[async_trait]
pub trait WindowAdapter: Send + Sync {
    /// On-screen windows, optionally including minimized ones
    async fn list_windows(&self, include_minimized: bool) -> Vec<WindowDescriptor>;

    /// Bring a window or application forward. Returns the focused bundle id
    /// when it is known.
    async fn focus_window(
        &self,
        window_id: Option<u32>,
        bundle_id: Option<&str>,
        launch_if_needed: bool,
        activate_all_windows: bool,
    ) -> AdapterResult<Option<String>>;

    /// Bundle id of the frontmost application
    async fn frontmost_bundle_id(&self) -> Option<String>;
}

/// Screen capture.
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    /// Capture the main display or a region. A quality selects JPEG.
    async fn capture(
        &self,
        region: Option<CaptureRegion>,
        quality: Option<f64>,
    ) -> AdapterResult<CaptureResult>;
}

/// OS privacy permission checks.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether the process may inject input events
    async fn has_accessibility(&self, prompt: bool) -> bool;

    /// Whether the process may capture the screen
    async fn has_screen_recording(&self, prompt: bool) -> bool;
}

/// Launch services.
#[async_trait]
pub trait WorkspaceAdapter: Send + Sync {
    /// Run `open` with the given arguments
    async fn open(&self, args: &[String]) -> AdapterResult<()>;

    /// Ask every running instance of `bundle_id` to quit. Returns how many
    /// instances were asked.
    async fn quit_app(&self, bundle_id: &str) -> AdapterResult<usize>;
}
