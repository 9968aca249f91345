//! Broker socket server
//!
//! Listens on a Unix socket and answers exactly one request per connection.
//! Connections are handled on their own tasks so one slow script never
//! stalls another client.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::probe::probe_automation;
use super::protocol::{
    BrokerMethod, BrokerRequest, BrokerResponse, CODE_BAD_REQUEST, CODE_EXEC_FAILED,
    CODE_INVALID_PARAMS,
};
use super::registry::ProcessRegistry;
use super::script::{ScriptExecutor, app_command_script};

/// Upper bound on one request line
const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Failure to bring the listener up.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Parent directory could not be created
    #[error("failed to create socket directory {path}: {source}")]
    SocketDir {
        /// Directory
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// A stale socket file could not be removed
    #[error("failed to remove stale socket {path}: {source}")]
    StaleSocket {
        /// Socket path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// Bind failed
    #[error("failed to bind broker socket {path}: {source}")]
    Bind {
        /// Socket path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },
}

/// Broker host server.
#[derive(Debug, Clone)]
pub struct BrokerServer {
    socket_path: PathBuf,
    registry: ProcessRegistry,
    executor: ScriptExecutor,
}

impl BrokerServer {
    /// Server for `socket_path` that runs scripts with `interpreter`
    pub fn new(socket_path: impl Into<PathBuf>, interpreter: impl Into<PathBuf>) -> Self {
        let registry = ProcessRegistry::new();
        Self {
            socket_path: socket_path.into(),
            executor: ScriptExecutor::new(interpreter, registry.clone()),
            registry,
        }
    }

    /// Socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Subprocess registry
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Create the socket directory, clear a stale socket and bind.
    pub fn bind(&self) -> Result<UnixListener, BrokerError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| BrokerError::SocketDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(path = %self.socket_path.display(), "removed stale socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(BrokerError::StaleSocket {
                    path: self.socket_path.clone(),
                    source,
                });
            }
        }

        UnixListener::bind(&self.socket_path).map_err(|source| BrokerError::Bind {
            path: self.socket_path.clone(),
            source,
        })
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        let listener = self.bind()?;
        self.serve_listener(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections on an already-bound listener until `shutdown`
    /// fires, then terminate tracked processes and unlink the socket.
    pub async fn serve_listener(&self, listener: UnixListener, shutdown: CancellationToken) {
        info!(path = %self.socket_path.display(), "broker listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            if let Err(err) = server.handle_connection(stream).await {
                                debug!(error = %err, "broker connection ended");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "broker accept failed"),
                },
                _ = shutdown.cancelled() => {
                    info!("broker shutting down");
                    break;
                }
            }
        }

        self.registry.terminate_all();
        let _ = std::fs::remove_file(&self.socket_path);
    }

    async fn handle_connection(&self, stream: UnixStream) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0
            || line.iter().all(u8::is_ascii_whitespace)
        {
            return Ok(());
        }

        let response = self.handle_line(&line).await;
        let mut encoded = serde_json::to_vec(&response)
            .unwrap_or_else(|_| br#"{"ok":false,"message":"encode failure"}"#.to_vec());
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        writer.shutdown().await
    }

    /// Decode and answer one raw request line.
    ///
    /// Bytes that are not valid UTF-8 JSON are answered with `BAD_REQUEST`.
    pub async fn handle_line(&self, line: &[u8]) -> BrokerResponse {
        match serde_json::from_slice::<BrokerRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(err) => {
                debug!(error = %err, "rejecting broker request");
                BrokerResponse::failure(
                    Uuid::new_v4().to_string(),
                    CODE_BAD_REQUEST,
                    format!("Invalid broker request: {err}"),
                )
            }
        }
    }

    /// Answer a decoded request.
    pub async fn handle_request(&self, request: BrokerRequest) -> BrokerResponse {
        debug!(id = %request.id, method = ?request.method, "broker request");
        let id = request.id;
        match request.method {
            BrokerMethod::Health => BrokerResponse::success(id, "broker_ok"),
            BrokerMethod::Stop => {
                let cancelled = self.registry.terminate_all();
                BrokerResponse {
                    cancelled_actions: Some(cancelled),
                    ..BrokerResponse::success(id, "broker_stop_completed")
                }
            }
            BrokerMethod::ApplescriptRun => {
                let Some(script) = request.script.filter(|s| !s.is_empty()) else {
                    return BrokerResponse::failure(id, CODE_INVALID_PARAMS, "script is required");
                };
                self.execute(id, &script, "applescript_executed").await
            }
            BrokerMethod::ApplescriptAppCommand => {
                if request.bundle_id.is_none() && request.app_name.is_none() {
                    return BrokerResponse::failure(
                        id,
                        CODE_INVALID_PARAMS,
                        "bundle_id or app_name is required",
                    );
                }
                let Some(command) = request.command.filter(|c| !c.is_empty()) else {
                    return BrokerResponse::failure(id, CODE_INVALID_PARAMS, "command is required");
                };
                let script = app_command_script(
                    request.bundle_id.as_deref(),
                    request.app_name.as_deref(),
                    &command,
                    request.activate.unwrap_or(false),
                );
                self.execute(id, &script, "applescript_app_command_executed")
                    .await
            }
            BrokerMethod::ProbeAutomation => {
                let result = probe_automation(
                    &self.executor,
                    request.bundle_id.as_deref(),
                    request.app_name.as_deref(),
                )
                .await;
                BrokerResponse::probe(id, result)
            }
        }
    }

    async fn execute(&self, id: String, script: &str, success_message: &str) -> BrokerResponse {
        match self.executor.run(script).await {
            Ok(output) => {
                BrokerResponse::success(id, success_message).with_output(output.stdout, output.stderr)
            }
            Err(err) => BrokerResponse::failure(id, CODE_EXEC_FAILED, err.message)
                .with_output(err.stdout, err.stderr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_lines_are_bad_requests() {
        let server = BrokerServer::new("/tmp/unused.sock", "/bin/sh");
        let response = server.handle_line(b"not json").await;
        assert!(!response.ok);
        assert_eq!(response.code.as_deref(), Some(CODE_BAD_REQUEST));
        assert!(response.message.starts_with("Invalid broker request: "));
        assert!(Uuid::parse_str(&response.id).is_ok());
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_bad_request() {
        let server = BrokerServer::new("/tmp/unused.sock", "/bin/sh");
        let response = server.handle_line(b"\xff\xfe\n").await;
        assert!(!response.ok);
        assert_eq!(response.code.as_deref(), Some(CODE_BAD_REQUEST));

        // trailing newline and padding are tolerated
        let response = server.handle_line(b"  {\"id\":\"h\",\"method\":\"health\"}\n").await;
        assert_eq!(response.id, "h");
        assert!(response.ok);
    }

    #[tokio::test]
    async fn empty_script_never_spawns() {
        let server = BrokerServer::new("/tmp/unused.sock", "/nonexistent/interpreter");
        let mut request = BrokerRequest::applescript_run("", None);
        request.id = "r1".into();
        let response = server.handle_request(request).await;
        assert_eq!(response.id, "r1");
        assert_eq!(response.code.as_deref(), Some(CODE_INVALID_PARAMS));
        assert_eq!(response.message, "script is required");
    }

    #[tokio::test]
    async fn app_command_requires_target_then_command() {
        let server = BrokerServer::new("/tmp/unused.sock", "/bin/sh");
        let response = server
            .handle_request(BrokerRequest::app_command(None, None, "quit", false))
            .await;
        assert_eq!(response.message, "bundle_id or app_name is required");

        let response = server
            .handle_request(BrokerRequest::app_command(None, Some("Notes".into()), "", false))
            .await;
        assert_eq!(response.message, "command is required");
    }
}
