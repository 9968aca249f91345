//! Script interpreter subprocesses

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::ProcessRegistry;

/// Default AppleScript interpreter
pub const DEFAULT_INTERPRETER: &str = "/usr/bin/osascript";

/// How long to wait for output pipes after killing a child. Grandchildren can
/// hold the pipes open past the child's death.
const KILLED_PIPE_GRACE: Duration = Duration::from_millis(250);

/// Captured output of a finished script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Trimmed standard output
    pub stdout: String,
    /// Trimmed standard error
    pub stderr: String,
}

/// Script failure, with whatever output was captured before it failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScriptError {
    /// stderr, or a generic message when stderr is empty
    pub message: String,
    /// Partial standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl ScriptError {
    fn launch(message: String) -> Self {
        Self {
            message,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Escape a value and wrap it in AppleScript double quotes.
pub fn quote_applescript(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `application id "..."`, `application "..."` or Finder when neither is given.
pub fn target_specifier(bundle_id: Option<&str>, app_name: Option<&str>) -> String {
    match (bundle_id, app_name) {
        (Some(bundle_id), _) => format!("application id {}", quote_applescript(bundle_id)),
        (None, Some(app_name)) => format!("application {}", quote_applescript(app_name)),
        (None, None) => "application \"Finder\"".to_string(),
    }
}

/// Wrap `command` in a `tell` block for the target, optionally activating it first.
pub fn app_command_script(
    bundle_id: Option<&str>,
    app_name: Option<&str>,
    command: &str,
    activate: bool,
) -> String {
    let mut lines = vec![format!("tell {}", target_specifier(bundle_id, app_name))];
    if activate {
        lines.push("activate".to_string());
    }
    lines.push(command.to_string());
    lines.push("end tell".to_string());
    lines.join("\n")
}

/// Runs scripts through an interpreter that reads its program from stdin.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    interpreter: PathBuf,
    registry: ProcessRegistry,
}

impl ScriptExecutor {
    /// Create an executor that tracks its children in `registry`
    pub fn new(interpreter: impl Into<PathBuf>, registry: ProcessRegistry) -> Self {
        Self {
            interpreter: interpreter.into(),
            registry,
        }
    }

    /// Interpreter path
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run `script` and wait for it.
    ///
    /// The child is registered before it is spawned and unregistered after it
    /// exits. A registry-wide terminate kills it.
    pub async fn run(&self, script: &str) -> Result<ScriptOutput, ScriptError> {
        let (process_id, kill) = self.registry.register(self.interpreter.display().to_string());
        let result = self.run_tracked(script, &kill).await;
        self.registry.unregister(&process_id);
        result
    }

    async fn run_tracked(
        &self,
        script: &str,
        kill: &tokio_util::sync::CancellationToken,
    ) -> Result<ScriptOutput, ScriptError> {
        let mut child = Command::new(&self.interpreter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ScriptError::launch(format!(
                    "Failed to run {}: {err}",
                    self.interpreter.display()
                ))
            })?;
        debug!(interpreter = %self.interpreter.display(), pid = ?child.id(), "spawned script");

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        if let Some(mut stdin) = child.stdin.take() {
            let source = format!("{script}\n");
            if let Err(err) = stdin.write_all(source.as_bytes()).await {
                debug!(error = %err, "interpreter closed stdin early");
            }
        }

        let (status, killed) = tokio::select! {
            status = child.wait() => (status, false),
            _ = kill.cancelled() => {
                if let Err(err) = child.start_kill() {
                    debug!(error = %err, "child already exited");
                }
                (child.wait().await, true)
            }
        };
        let status = status.map_err(|err| {
            ScriptError::launch(format!("Failed to wait for interpreter: {err}"))
        })?;

        let stdout = collect(stdout_task, killed).await;
        let stderr = collect(stderr_task, killed).await;

        if status.success() {
            return Ok(ScriptOutput { stdout, stderr });
        }

        let message = if stderr.is_empty() {
            format!("osascript failed with status {}", status.code().unwrap_or(-1))
        } else {
            stderr.clone()
        };
        warn!(%message, killed, "script failed");
        Err(ScriptError {
            message,
            stdout,
            stderr,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(err) = pipe.read_to_end(&mut buffer).await {
            debug!(error = %err, "failed to read interpreter output");
        }
    }
    String::from_utf8_lossy(&buffer).trim().to_string()
}

async fn collect(task: JoinHandle<String>, killed: bool) -> String {
    if killed {
        let abort = task.abort_handle();
        match tokio::time::timeout(KILLED_PIPE_GRACE, task).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                abort.abort();
                String::new()
            }
        }
    } else {
        task.await.unwrap_or_default()
    }
}
