//! Event-driven input behavior
//!
//! [`EventDrivenInput`] owns the timing and sequencing of mouse and keyboard
//! actions: interpolation, click loops, chord parsing, per-character typing
//! and the paste-then-type fallback. The raw events go to an [`EventSink`],
//! and the clipboard is reached through a [`Clipboard`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AdapterError, AdapterResult, InputAdapter, check_cancelled};
use crate::types::{MouseButton, TextInputMode};

const STEP_INTERVAL: Duration = Duration::from_millis(16);
const CLICK_INTERVAL: Duration = Duration::from_millis(25);
const CHORD_INTERVAL: Duration = Duration::from_millis(30);
const TYPING_INTERVAL: Duration = Duration::from_millis(12);

/// Kind of a synthetic mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    /// Cursor move with no button held
    Moved,
    /// Button press
    Down,
    /// Button release
    Up,
    /// Cursor move with the left button held
    Dragged,
}

/// Modifier keys held during a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    /// Command
    pub command: bool,
    /// Shift
    pub shift: bool,
    /// Option
    pub option: bool,
    /// Control
    pub control: bool,
}

/// Low-level event poster.
pub trait EventSink: Send + Sync {
    /// Current cursor location
    fn cursor_position(&self) -> AdapterResult<(f64, f64)>;

    /// Post a mouse event
    fn post_mouse(
        &self,
        kind: MouseEventKind,
        point: (f64, f64),
        button: MouseButton,
    ) -> AdapterResult<()>;

    /// Post a pixel scroll
    fn post_scroll(&self, delta_x: f64, delta_y: f64) -> AdapterResult<()>;

    /// Post a virtual key transition
    fn post_key(&self, key_code: u16, down: bool, modifiers: Modifiers) -> AdapterResult<()>;

    /// Post a down/up pair that types one character
    fn post_char(&self, ch: char) -> AdapterResult<()>;
}

/// System pasteboard writer.
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Replace the pasteboard contents with `text`
    async fn set_text(&self, text: &str) -> AdapterResult<()>;
}

/// A parsed key chord: held modifiers plus an optional primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    /// Modifier state applied to every event in the chord
    pub modifiers: Modifiers,
    /// Modifier key codes in press order
    pub modifier_codes: Vec<u16>,
    /// Non-modifier key, if any
    pub primary: Option<u16>,
}

impl KeyChord {
    /// Parse key names such as `["cmd", "shift", "t"]`.
    pub fn parse(keys: &[String]) -> AdapterResult<Self> {
        if keys.is_empty() {
            return Err(AdapterError::failed("keys cannot be empty"));
        }

        let mut chord = KeyChord {
            modifiers: Modifiers::default(),
            modifier_codes: Vec::new(),
            primary: None,
        };
        for raw in keys {
            match raw.to_lowercase().as_str() {
                "cmd" | "command" => {
                    chord.modifiers.command = true;
                    chord.modifier_codes.push(55);
                }
                "shift" => {
                    chord.modifiers.shift = true;
                    chord.modifier_codes.push(56);
                }
                "opt" | "option" | "alt" => {
                    chord.modifiers.option = true;
                    chord.modifier_codes.push(58);
                }
                "ctrl" | "control" => {
                    chord.modifiers.control = true;
                    chord.modifier_codes.push(59);
                }
                other => {
                    let code = key_code(other)
                        .ok_or_else(|| AdapterError::failed(format!("Unsupported key: {raw}")))?;
                    chord.primary = Some(code);
                }
            }
        }
        Ok(chord)
    }

    /// Canonical chord name: lowercased, sorted, joined with `+`.
    pub fn normalize(keys: &[String]) -> String {
        let mut lowered: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
        lowered.sort();
        lowered.join("+")
    }
}

fn key_code(key: &str) -> Option<u16> {
    let code = match key {
        "a" => 0,
        "s" => 1,
        "d" => 2,
        "f" => 3,
        "h" => 4,
        "g" => 5,
        "z" => 6,
        "x" => 7,
        "c" => 8,
        "v" => 9,
        "b" => 11,
        "q" => 12,
        "w" => 13,
        "e" => 14,
        "r" => 15,
        "y" => 16,
        "t" => 17,
        "1" => 18,
        "2" => 19,
        "3" => 20,
        "4" => 21,
        "6" => 22,
        "5" => 23,
        "=" => 24,
        "9" => 25,
        "7" => 26,
        "-" => 27,
        "8" => 28,
        "0" => 29,
        "]" => 30,
        "o" => 31,
        "u" => 32,
        "[" => 33,
        "i" => 34,
        "p" => 35,
        "return" | "enter" => 36,
        "l" => 37,
        "j" => 38,
        "'" => 39,
        "k" => 40,
        ";" => 41,
        "\\" => 42,
        "," => 43,
        "/" => 44,
        "n" => 45,
        "m" => 46,
        "." => 47,
        "tab" => 48,
        "space" => 49,
        "delete" | "backspace" => 51,
        "escape" => 53,
        "left" => 123,
        "right" => 124,
        "down" => 125,
        "up" => 126,
        _ => return None,
    };
    Some(code)
}

fn interpolation_steps(duration_ms: i64) -> i64 {
    (duration_ms / 16).max(1)
}

fn lerp(from: (f64, f64), to: (f64, f64), progress: f64) -> (f64, f64) {
    (
        from.0 + (to.0 - from.0) * progress,
        from.1 + (to.1 - from.1) * progress,
    )
}

/// [`InputAdapter`] that sequences events onto an [`EventSink`].
pub struct EventDrivenInput<S> {
    sink: S,
    clipboard: Arc<dyn Clipboard>,
}

impl<S: EventSink> EventDrivenInput<S> {
    /// Combine a sink with a clipboard
    pub fn new(sink: S, clipboard: Arc<dyn Clipboard>) -> Self {
        Self { sink, clipboard }
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Write the pasteboard, then press cmd+v.
    pub async fn paste_text(&self, text: &str, cancel: &CancellationToken) -> AdapterResult<()> {
        self.clipboard.set_text(text).await?;
        self.key_chord(&["cmd".to_string(), "v".to_string()], 1, cancel)
            .await
    }

    /// Type each character with a short pause between them.
    pub async fn type_text(&self, text: &str, cancel: &CancellationToken) -> AdapterResult<()> {
        for ch in text.chars() {
            check_cancelled(cancel)?;
            self.sink.post_char(ch)?;
            tokio::time::sleep(TYPING_INTERVAL).await;
        }
        Ok(())
    }

    fn post_chord(&self, chord: &KeyChord) -> AdapterResult<()> {
        for code in &chord.modifier_codes {
            self.sink.post_key(*code, true, chord.modifiers)?;
        }
        if let Some(primary) = chord.primary {
            self.sink.post_key(primary, true, chord.modifiers)?;
            self.sink.post_key(primary, false, chord.modifiers)?;
        }
        for code in chord.modifier_codes.iter().rev() {
            self.sink.post_key(*code, false, Modifiers::default())?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EventSink> InputAdapter for EventDrivenInput<S> {
    async fn move_mouse(
        &self,
        x: f64,
        y: f64,
        duration_ms: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        if duration_ms <= 0 {
            return self
                .sink
                .post_mouse(MouseEventKind::Moved, (x, y), MouseButton::Left);
        }

        let start = self.sink.cursor_position()?;
        let steps = interpolation_steps(duration_ms);
        for index in 1..=steps {
            check_cancelled(cancel)?;
            let point = lerp(start, (x, y), index as f64 / steps as f64);
            self.sink
                .post_mouse(MouseEventKind::Moved, point, MouseButton::Left)?;
            tokio::time::sleep(STEP_INTERVAL).await;
        }
        Ok(())
    }

    async fn click_mouse(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        for _ in 0..click_count.max(1) {
            check_cancelled(cancel)?;
            self.sink.post_mouse(MouseEventKind::Down, (x, y), button)?;
            self.sink.post_mouse(MouseEventKind::Up, (x, y), button)?;
            tokio::time::sleep(CLICK_INTERVAL).await;
        }
        Ok(())
    }

    async fn drag_mouse(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        duration_ms: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        self.sink
            .post_mouse(MouseEventKind::Down, from, MouseButton::Left)?;

        let steps = interpolation_steps(duration_ms);
        let mut current = from;
        for index in 1..=steps {
            if let Err(err) = check_cancelled(cancel) {
                // never leave the button held
                let _ = self
                    .sink
                    .post_mouse(MouseEventKind::Up, current, MouseButton::Left);
                return Err(err);
            }
            current = lerp(from, to, index as f64 / steps as f64);
            self.sink
                .post_mouse(MouseEventKind::Dragged, current, MouseButton::Left)?;
            tokio::time::sleep(STEP_INTERVAL).await;
        }

        self.sink
            .post_mouse(MouseEventKind::Up, to, MouseButton::Left)
    }

    async fn scroll(
        &self,
        delta_x: f64,
        delta_y: f64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        check_cancelled(cancel)?;
        self.sink.post_scroll(delta_x, delta_y)
    }

    async fn text_input(
        &self,
        text: &str,
        mode: TextInputMode,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        match mode {
            TextInputMode::Paste => self.paste_text(text, cancel).await,
            TextInputMode::Keystroke => self.type_text(text, cancel).await,
            TextInputMode::Auto => match self.paste_text(text, cancel).await {
                Ok(()) => Ok(()),
                Err(AdapterError::Cancelled) => Err(AdapterError::Cancelled),
                Err(err) => {
                    debug!(error = %err, "paste failed, falling back to keystrokes");
                    self.type_text(text, cancel).await
                }
            },
        }
    }

    async fn key_chord(
        &self,
        keys: &[String],
        repeat: i64,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        let chord = KeyChord::parse(keys)?;
        for _ in 0..repeat.max(1) {
            check_cancelled(cancel)?;
            self.post_chord(&chord)?;
            tokio::time::sleep(CHORD_INTERVAL).await;
        }
        Ok(())
    }
}
