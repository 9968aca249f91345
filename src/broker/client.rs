//! Broker client
//!
//! Each call opens a fresh connection, writes one request line and reads one
//! response line, every step bounded by a timeout. Calls that allow
//! autostart relaunch the broker once after a failure and retry exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::protocol::{BrokerMethod, BrokerRequest, BrokerResponse, CODE_EXEC_FAILED};
use super::script::ScriptOutput;
use crate::config::{BrokerConfig, expand_tilde};
use crate::types::{PermissionErrorCode, PermissionProbeResult, PermissionProbeStatus};

/// Bound on each of connect, send and receive
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(20);

const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Failure of a broker call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BrokerClientError {
    /// Machine-readable code
    pub code: PermissionErrorCode,
    /// Human-readable message
    pub message: String,
    /// Output captured before a script failed
    pub output: Option<ScriptOutput>,
}

impl BrokerClientError {
    /// Error without captured output
    pub fn new(code: PermissionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            output: None,
        }
    }
}

/// Result alias for broker calls
pub type BrokerResult<T> = std::result::Result<T, BrokerClientError>;

/// Identity of the configured broker host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerIdentity {
    /// Bundle id
    pub bundle_id: String,
    /// Expanded app path
    pub path: PathBuf,
    /// Whether `codesign` verifies the bundle
    pub signed: bool,
}

/// Operations the tool executor needs from the broker.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Run a script
    async fn run_applescript(
        &self,
        script: &str,
        target_bundle_id: Option<&str>,
    ) -> BrokerResult<ScriptOutput>;

    /// Run a command inside a `tell application` block
    async fn app_command(
        &self,
        bundle_id: Option<&str>,
        app_name: Option<&str>,
        command: &str,
        activate: bool,
    ) -> BrokerResult<ScriptOutput>;

    /// Classify automation permission for a target
    async fn probe_automation(
        &self,
        bundle_id: Option<&str>,
        app_name: Option<&str>,
    ) -> BrokerResult<PermissionProbeResult>;

    /// Whether the broker answers `health`
    async fn health(&self, autostart: bool) -> bool;

    /// Terminate broker subprocesses. Returns how many were tracked.
    async fn stop_active(&self) -> usize;

    /// Configured host identity
    async fn identity(&self) -> BrokerIdentity;
}

/// Restarts a broker that could not be reached.
#[async_trait]
pub trait BrokerLauncher: Send + Sync {
    /// Best-effort launch. Must not fail the caller.
    async fn launch(&self, config: &BrokerConfig);
}

async fn run_quiet(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output().await {
        Ok(output) => {
            debug!(program, ?args, status = ?output.status.code(), "launcher step");
            output
                .status
                .success()
                .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Err(err) => {
            debug!(program, error = %err, "launcher step failed to start");
            None
        }
    }
}

/// Launcher that kickstarts the launch agent, then opens the app bundle.
#[derive(Debug, Default, Clone)]
pub struct LaunchdLauncher;

#[async_trait]
impl BrokerLauncher for LaunchdLauncher {
    async fn launch(&self, config: &BrokerConfig) {
        let label = &config.launch_agent_label;
        let uid = run_quiet("/usr/bin/id", &["-u"]).await.unwrap_or_default();
        let domain = format!("gui/{uid}");
        let service = format!("{domain}/{label}");
        info!(%service, "relaunching broker");

        run_quiet("/bin/launchctl", &["kickstart", "-k", &service]).await;

        let plist = expand_tilde(&format!("~/Library/LaunchAgents/{label}.plist"));
        if plist.exists() {
            let plist = plist.display().to_string();
            run_quiet("/bin/launchctl", &["bootstrap", &domain, &plist]).await;
            run_quiet("/bin/launchctl", &["kickstart", "-k", &service]).await;
        }

        let app_path = config.app_path().display().to_string();
        run_quiet("/usr/bin/open", &["-g", &app_path]).await;

        tokio::time::sleep(SETTLE_DELAY).await;
    }
}

/// Unix socket broker client.
#[derive(Clone)]
pub struct BrokerClient {
    config: BrokerConfig,
    launcher: Arc<dyn BrokerLauncher>,
    io_timeout: Duration,
}

impl BrokerClient {
    /// Client for the configured broker using the launchd launcher
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_launcher(config, Arc::new(LaunchdLauncher))
    }

    /// Client with a custom launcher
    pub fn with_launcher(config: BrokerConfig, launcher: Arc<dyn BrokerLauncher>) -> Self {
        Self {
            config,
            launcher,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Override the per-step timeout
    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Expanded socket path
    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path()
    }

    /// Send one request, relaunching and retrying once when `autostart` is set.
    pub async fn send(&self, request: &BrokerRequest, autostart: bool) -> BrokerResult<BrokerResponse> {
        let socket = self.socket_path();
        match self.round_trip(&socket, request).await {
            Ok(response) => return Ok(response),
            Err(err) if !autostart => {
                debug!(error = %err, "broker unreachable");
                return Err(BrokerClientError::new(
                    PermissionErrorCode::BrokerUnavailable,
                    format!("Unable to reach broker socket {}: {err}", socket.display()),
                ));
            }
            Err(err) => warn!(error = %err, "broker unreachable, attempting autostart"),
        }

        self.launcher.launch(&self.config).await;

        self.round_trip(&socket, request).await.map_err(|err| {
            warn!(error = %err, "broker still unreachable after autostart");
            BrokerClientError::new(
                PermissionErrorCode::BrokerUnavailable,
                format!(
                    "Broker is unavailable at {}. Start {} and retry.",
                    socket.display(),
                    self.config.app_path().display()
                ),
            )
        })
    }

    async fn round_trip(&self, socket: &Path, request: &BrokerRequest) -> std::io::Result<BrokerResponse> {
        let timed_out = |step: &str| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, format!("broker {step} timed out"))
        };

        let stream = tokio::time::timeout(self.io_timeout, UnixStream::connect(socket))
            .await
            .map_err(|_| timed_out("connect"))??;
        let (reader, mut writer) = stream.into_split();

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        tokio::time::timeout(self.io_timeout, async {
            writer.write_all(&payload).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| timed_out("send"))??;

        let mut line = String::new();
        let read = tokio::time::timeout(self.io_timeout, BufReader::new(reader).read_line(&mut line))
            .await
            .map_err(|_| timed_out("receive"))??;
        if read == 0 || line.trim().is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Broker returned empty response",
            ));
        }

        Ok(serde_json::from_str(line.trim())?)
    }

    fn script_result(response: BrokerResponse) -> BrokerResult<ScriptOutput> {
        let output = ScriptOutput {
            stdout: response.stdout.unwrap_or_default(),
            stderr: response.stderr.unwrap_or_default(),
        };
        if response.ok {
            return Ok(output);
        }
        let ran = response.code.as_deref() == Some(CODE_EXEC_FAILED);
        Err(BrokerClientError {
            code: PermissionErrorCode::ExecFailed,
            message: response.message,
            output: ran.then_some(output),
        })
    }
}

#[async_trait]
impl BrokerApi for BrokerClient {
    async fn run_applescript(
        &self,
        script: &str,
        target_bundle_id: Option<&str>,
    ) -> BrokerResult<ScriptOutput> {
        let request = BrokerRequest::applescript_run(script, target_bundle_id.map(str::to_string));
        Self::script_result(self.send(&request, true).await?)
    }

    async fn app_command(
        &self,
        bundle_id: Option<&str>,
        app_name: Option<&str>,
        command: &str,
        activate: bool,
    ) -> BrokerResult<ScriptOutput> {
        let request = BrokerRequest::app_command(
            bundle_id.map(str::to_string),
            app_name.map(str::to_string),
            command,
            activate,
        );
        Self::script_result(self.send(&request, true).await?)
    }

    async fn probe_automation(
        &self,
        bundle_id: Option<&str>,
        app_name: Option<&str>,
    ) -> BrokerResult<PermissionProbeResult> {
        let request = BrokerRequest::probe(bundle_id.map(str::to_string), app_name.map(str::to_string));
        let response = self.send(&request, true).await?;
        Ok(PermissionProbeResult {
            status: response.probe_status.unwrap_or(PermissionProbeStatus::Error),
            error_code: response.probe_error_code,
            message: response.message,
            remediation: response.remediation.unwrap_or_default(),
        })
    }

    async fn health(&self, autostart: bool) -> bool {
        self.send(&BrokerRequest::new(BrokerMethod::Health), autostart)
            .await
            .map(|response| response.ok)
            .unwrap_or(false)
    }

    async fn stop_active(&self) -> usize {
        self.send(&BrokerRequest::new(BrokerMethod::Stop), false)
            .await
            .ok()
            .and_then(|response| response.cancelled_actions)
            .unwrap_or(0)
    }

    async fn identity(&self) -> BrokerIdentity {
        let path = self.config.app_path();
        let signed = if path.exists() {
            let path_arg = path.display().to_string();
            run_quiet("/usr/bin/codesign", &["--verify", "--deep", "--strict", &path_arg])
                .await
                .is_some()
        } else {
            false
        };
        BrokerIdentity {
            bundle_id: self.config.bundle_id.clone(),
            path,
            signed,
        }
    }
}
