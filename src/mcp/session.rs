//! Line-delimited JSON-RPC session for the MCP front end.
//!
//! The session reads its input strictly one line at a time, but every request
//! that carries an id is dispatched onto its own task and tracked in an
//! in-flight map until its response has been written. Notifications are
//! handled inline and never answered.
//!
//! Session state (initialized flag, negotiated version, in-flight map) lives
//! behind a single mutex and is never touched outside it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::error::SessionError;
use super::jsonrpc::{ErrorObject, Request, RequestId, Response, extract_id};
use super::tooling::{ImageDeliveryMode, ToolExecutor};
use super::value::JsonValue;
use super::versioning;

/// Sink for serialized responses.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    /// Write one response. Failures are the writer's concern.
    async fn write(&self, response: &Response);
}

/// Writes each response as one JSON line to an async writer.
pub struct LineWriter<W> {
    inner: tokio::sync::Mutex<W>,
}

impl<W> LineWriter<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ResponseWriter for LineWriter<W> {
    async fn write(&self, response: &Response) {
        let mut line = match serde_json::to_vec(response) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode response");
                return;
            }
        };
        line.push(b'\n');

        let mut writer = self.inner.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            warn!(error = %err, "failed to write response");
        }
    }
}

/// Identity advertised in the initialize result.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

struct InFlight {
    seq: u64,
    cancel: CancellationToken,
}

struct SessionState {
    initialized: bool,
    negotiated_version: &'static str,
    in_flight: HashMap<RequestId, InFlight>,
    next_seq: u64,
}

struct Shared {
    info: ServerInfo,
    executor: Arc<dyn ToolExecutor>,
    writer: Arc<dyn ResponseWriter>,
    image_delivery: ImageDeliveryMode,
    state: Mutex<SessionState>,
    tasks: TaskTracker,
}

/// MCP protocol session.
#[derive(Clone)]
pub struct McpServer {
    shared: Arc<Shared>,
}

impl McpServer {
    /// Create a session in the uninitialized state.
    pub fn new(
        info: ServerInfo,
        executor: Arc<dyn ToolExecutor>,
        writer: Arc<dyn ResponseWriter>,
    ) -> Self {
        Self::with_image_delivery(info, executor, writer, ImageDeliveryMode::default())
    }

    /// Create a session that renders images with the given delivery mode.
    pub fn with_image_delivery(
        info: ServerInfo,
        executor: Arc<dyn ToolExecutor>,
        writer: Arc<dyn ResponseWriter>,
        image_delivery: ImageDeliveryMode,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                info,
                executor,
                writer,
                image_delivery,
                state: Mutex::new(SessionState {
                    initialized: false,
                    negotiated_version: versioning::latest(),
                    in_flight: HashMap::new(),
                    next_seq: 0,
                }),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Version chosen by the last `initialize`
    pub fn negotiated_version(&self) -> &'static str {
        self.shared.state.lock().negotiated_version
    }

    /// Whether `notifications/initialized` has been received
    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().initialized
    }

    /// Number of requests still awaiting a response
    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Consume lines until EOF, then wait for every in-flight dispatch.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so a bad line is
    /// handled like any other unparseable input. In-flight requests are
    /// drained even when reading fails.
    pub async fn serve<R: AsyncBufRead + Unpin>(&self, mut reader: R) -> std::io::Result<()> {
        let mut buffer = Vec::new();
        let outcome = loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break Ok(()),
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim();
                    if !line.is_empty() {
                        self.receive(line).await;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "input stream failed");
                    break Err(err);
                }
            }
        };
        self.wait_for_in_flight().await;
        outcome
    }

    /// Handle one inbound line.
    pub async fn receive(&self, line: &str) {
        let value = match JsonValue::parse(line) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "dropping unparseable line");
                return;
            }
        };

        let Some(request) = Request::from_value(&value) else {
            if let Some(id) = extract_id(&value) {
                self.respond_error(id, SessionError::Parse("Invalid JSON-RPC payload".into()))
                    .await;
            }
            return;
        };

        if request.jsonrpc != "2.0" {
            if let Some(id) = request.id {
                self.respond_error(id, SessionError::InvalidRequest("jsonrpc must be 2.0".into()))
                    .await;
            }
            return;
        }

        if request.method == "notifications/cancelled" {
            self.cancel_in_flight(request.params.as_ref());
            return;
        }

        let Some(id) = request.id.clone() else {
            if request.method == "notifications/initialized" {
                self.shared.state.lock().initialized = true;
                debug!("session initialized");
            } else {
                debug!(method = %request.method, "ignoring notification");
            }
            return;
        };

        self.spawn_dispatch(id, request);
    }

    /// Wait until every dispatched request has written its response.
    pub async fn wait_for_in_flight(&self) {
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        self.shared.tasks.reopen();
    }

    fn spawn_dispatch(&self, id: RequestId, request: Request) {
        let cancel = CancellationToken::new();
        let seq = {
            let mut state = self.shared.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.in_flight.insert(
                id.clone(),
                InFlight {
                    seq,
                    cancel: cancel.clone(),
                },
            );
            seq
        };

        let server = self.clone();
        self.shared.tasks.spawn(async move {
            let response = tokio::select! {
                response = server.process(id.clone(), request) => response,
                _ = cancel.cancelled() => {
                    debug!(%id, "request cancelled");
                    Response::failure(
                        id.clone(),
                        SessionError::Internal(format!("Request {id} was cancelled")).into(),
                    )
                }
            };
            server.shared.writer.write(&response).await;
            server.finish(&id, seq);
        });
    }

    fn finish(&self, id: &RequestId, seq: u64) {
        let mut state = self.shared.state.lock();
        if state.in_flight.get(id).is_some_and(|entry| entry.seq == seq) {
            state.in_flight.remove(id);
        }
    }

    fn cancel_in_flight(&self, params: Option<&JsonValue>) {
        let Some(id) = params
            .and_then(|p| p.get("requestId"))
            .and_then(RequestId::from_value)
        else {
            return;
        };

        let entry = self.shared.state.lock().in_flight.remove(&id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
        }
    }

    async fn respond_error(&self, id: RequestId, err: SessionError) {
        let response = Response::failure(id, ErrorObject::from(err));
        self.shared.writer.write(&response).await;
    }

    async fn process(&self, id: RequestId, request: Request) -> Response {
        debug!(%id, method = %request.method, "dispatching request");
        match self.dispatch(&request.method, request.params).await {
            Ok(result) => Response::success(id, result),
            Err(err) => Response::failure(id, err.into()),
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, SessionError> {
        match method {
            "initialize" => self.cmd_initialize(params.as_ref()),
            "ping" => Ok(JsonValue::empty_object()),
            "tools/list" => Ok(self.cmd_tools_list()),
            "tools/call" => self.cmd_tools_call(params).await,
            other => Err(SessionError::MethodNotFound(other.to_string())),
        }
    }

    fn cmd_initialize(&self, params: Option<&JsonValue>) -> Result<JsonValue, SessionError> {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                SessionError::InvalidParams("initialize.params.protocolVersion is required".into())
            })?;

        let negotiated = versioning::negotiate(requested);
        self.shared.state.lock().negotiated_version = negotiated;

        Ok(JsonValue::object([
            ("protocolVersion", JsonValue::from(negotiated)),
            (
                "capabilities",
                JsonValue::object([(
                    "tools",
                    JsonValue::object([("listChanged", JsonValue::Bool(false))]),
                )]),
            ),
            (
                "serverInfo",
                JsonValue::object([
                    ("name", JsonValue::from(self.shared.info.name.as_str())),
                    ("version", JsonValue::from(self.shared.info.version.as_str())),
                ]),
            ),
        ]))
    }

    fn cmd_tools_list(&self) -> JsonValue {
        let tools = self
            .shared
            .executor
            .list_tools()
            .iter()
            .map(|tool| tool.to_value())
            .collect();
        JsonValue::object([("tools", JsonValue::Array(tools))])
    }

    async fn cmd_tools_call(&self, params: Option<JsonValue>) -> Result<JsonValue, SessionError> {
        self.ensure_initialized()?;

        let mut params = match params {
            Some(JsonValue::Object(map)) => map,
            _ => return Err(SessionError::InvalidParams("tools/call requires name".into())),
        };
        let name = match params.remove("name") {
            Some(JsonValue::String(name)) => name,
            _ => return Err(SessionError::InvalidParams("tools/call requires name".into())),
        };
        let arguments = params.remove("arguments");

        let result = self.shared.executor.call_tool(&name, arguments).await?;
        Ok(result.to_value(self.shared.image_delivery))
    }

    fn ensure_initialized(&self) -> Result<(), SessionError> {
        if self.shared.state.lock().initialized {
            Ok(())
        } else {
            Err(SessionError::InvalidRequest("Server not initialized".into()))
        }
    }
}
