//! Process wiring for the MCP server binary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::info;

use super::executor::{OperatorAdapters, OperatorDeps, OperatorToolExecutor};
use crate::adapters::{
    CommandPermissionChecker, EventDrivenInput, OpenWorkspace, PbcopyClipboard,
    ScreencaptureAdapter, SystemEventsWindows, UnsupportedEventSink,
};
use crate::audit::AuditLogger;
use crate::automation::AutomationQueue;
use crate::broker::BrokerClient;
use crate::config::{AppConfig, ConfigStore};
use crate::mcp::{ImageDeliveryMode, LineWriter, McpServer, ServerInfo};
use crate::safety::SafetyEngine;

/// Adapters backed by the stock macOS command-line tools.
pub fn system_adapters() -> OperatorAdapters {
    OperatorAdapters {
        input: Arc::new(EventDrivenInput::new(
            UnsupportedEventSink,
            Arc::new(PbcopyClipboard),
        )),
        windows: Arc::new(SystemEventsWindows),
        capture: Arc::new(ScreencaptureAdapter::default()),
        permissions: Arc::new(CommandPermissionChecker),
        workspace: Arc::new(OpenWorkspace),
    }
}

/// Wire production components from a loaded configuration.
pub fn system_deps(store: Arc<ConfigStore>, config: &AppConfig) -> OperatorDeps {
    OperatorDeps {
        audit: Arc::new(AuditLogger::with_default_path(config.audit_enabled)),
        safety: Arc::new(SafetyEngine::new(config.default_mode, &config.app_whitelist)),
        queue: AutomationQueue::new(),
        broker: Arc::new(BrokerClient::new(config.broker.clone())),
        adapters: system_adapters(),
        config: store,
    }
}

/// Identity advertised to clients
pub fn server_info() -> ServerInfo {
    ServerInfo {
        name: crate::SERVER_NAME.to_string(),
        version: crate::VERSION.to_string(),
    }
}

/// Fully wired operator ready to serve one client.
pub struct OperatorRuntime {
    executor: Arc<OperatorToolExecutor>,
    image_delivery: ImageDeliveryMode,
}

impl OperatorRuntime {
    /// Load configuration (default location unless `config_path` is given)
    /// and wire the system adapters.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let store = Arc::new(config_path.map(ConfigStore::new).unwrap_or_default());
        let config = store
            .load()
            .with_context(|| format!("Failed to load configuration from {:?}", store.path()))?;
        info!(path = %store.path().display(), "configuration loaded");

        let deps = system_deps(store, &config);
        Ok(Self::new(deps, config.image_delivery))
    }

    /// Runtime over explicit components
    pub fn new(deps: OperatorDeps, image_delivery: ImageDeliveryMode) -> Self {
        Self {
            executor: Arc::new(OperatorToolExecutor::new(deps)),
            image_delivery,
        }
    }

    /// Cancel queued and running actions. Returns how many were affected.
    pub fn stop_all(&self) -> usize {
        self.executor.queue().stop_all()
    }

    /// Serve one session over `reader`/`writer` until EOF, then drain
    /// in-flight requests.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let server = McpServer::with_image_delivery(
            server_info(),
            self.executor.clone(),
            Arc::new(LineWriter::new(writer)),
            self.image_delivery,
        );
        server.serve(reader).await
    }

    /// Serve on the process's stdin and stdout.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        info!("serving MCP on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }
}
