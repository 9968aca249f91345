//! Broker client against a live host served on a temporary socket, with
//! `/bin/sh` standing in for the script interpreter.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use macos_mcp_operator::broker::protocol::{
    BrokerResponse, CODE_BAD_REQUEST, CODE_EXEC_FAILED, CODE_INVALID_PARAMS,
};
use macos_mcp_operator::broker::{
    BrokerApi, BrokerClient, BrokerLauncher, BrokerMethod, BrokerRequest, BrokerServer,
};
use macos_mcp_operator::config::BrokerConfig;
use macos_mcp_operator::types::PermissionErrorCode;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingLauncher {
    launches: AtomicUsize,
}

#[async_trait]
impl BrokerLauncher for CountingLauncher {
    async fn launch(&self, _config: &BrokerConfig) {
        self.launches.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    _dir: TempDir,
    server: BrokerServer,
    client: BrokerClient,
    launcher: Arc<CountingLauncher>,
    shutdown: CancellationToken,
    serving: JoinHandle<()>,
}

fn client_for(socket: &Path, launcher: Arc<CountingLauncher>) -> BrokerClient {
    let config = BrokerConfig {
        socket_path: socket.display().to_string(),
        ..BrokerConfig::default()
    };
    BrokerClient::with_launcher(config, launcher).with_timeout(Duration::from_secs(10))
}

fn start() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("run").join("broker.sock");
    let server = BrokerServer::new(&socket, "/bin/sh");
    let listener = server.bind().expect("bind");

    let shutdown = CancellationToken::new();
    let serving = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.serve_listener(listener, shutdown).await })
    };

    let launcher = Arc::new(CountingLauncher::default());
    let client = client_for(&socket, launcher.clone());
    Harness {
        _dir: dir,
        server,
        client,
        launcher,
        shutdown,
        serving,
    }
}

async fn raw_exchange(socket: &Path, line: &[u8]) -> BrokerResponse {
    let stream = UnixStream::connect(socket).await.expect("connect");
    let (reader, mut writer) = stream.into_split();
    writer.write_all(line).await.expect("write request");
    writer.shutdown().await.expect("half close");

    let mut reply = String::new();
    BufReader::new(reader)
        .read_line(&mut reply)
        .await
        .expect("read reply");
    serde_json::from_str(&reply).expect("response line")
}

#[tokio::test]
async fn health_and_script_output() {
    let harness = start();

    assert!(harness.client.health(false).await);

    let output = harness
        .client
        .run_applescript("echo hello; echo careful >&2", None)
        .await
        .expect("script output");
    assert_eq!(output.stdout, "hello");
    assert_eq!(output.stderr, "careful");
    assert_eq!(harness.launcher.launches.load(Ordering::SeqCst), 0);
    assert!(harness.server.registry().is_empty());
}

#[tokio::test]
async fn failed_script_keeps_its_output() {
    let harness = start();

    let err = harness
        .client
        .run_applescript("echo partial; exit 3", Some("com.apple.Notes"))
        .await
        .expect_err("non-zero exit");
    assert_eq!(err.code, PermissionErrorCode::ExecFailed);
    assert_eq!(err.message, "osascript failed with status 3");
    let output = err.output.expect("output attached");
    assert_eq!(output.stdout, "partial");
    assert_eq!(output.stderr, "");

    let err = harness
        .client
        .run_applescript("echo oops >&2; exit 1", None)
        .await
        .expect_err("non-zero exit");
    assert_eq!(err.message, "oops");
}

#[tokio::test]
async fn parameter_errors_carry_no_output() {
    let harness = start();

    let err = harness
        .client
        .run_applescript("", None)
        .await
        .expect_err("empty script");
    assert_eq!(err.code, PermissionErrorCode::ExecFailed);
    assert_eq!(err.message, "script is required");
    assert!(err.output.is_none());

    let response = harness
        .client
        .send(&BrokerRequest::new(BrokerMethod::ApplescriptAppCommand), false)
        .await
        .expect("response");
    assert!(!response.ok);
    assert_eq!(response.code.as_deref(), Some(CODE_INVALID_PARAMS));
    assert_eq!(response.message, "bundle_id or app_name is required");
}

#[tokio::test]
async fn stop_terminates_running_scripts() {
    let harness = start();

    let running = {
        let client = harness.client.clone();
        tokio::spawn(async move { client.run_applescript("sleep 30", None).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("script registered");

    assert_eq!(harness.client.stop_active().await, 1);

    let outcome = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("killed script returns")
        .expect("join");
    let err = outcome.expect_err("killed script fails");
    assert_eq!(err.code, PermissionErrorCode::ExecFailed);
    assert!(harness.server.registry().is_empty());

    // nothing left to stop
    assert_eq!(harness.client.stop_active().await, 0);
}

#[tokio::test]
async fn shutdown_unlinks_the_socket() {
    let harness = start();
    let socket = harness.server.socket_path().to_path_buf();
    assert!(socket.exists());

    harness.shutdown.cancel();
    harness.serving.await.expect("serve loop");

    assert!(!socket.exists());
    assert!(!harness.client.health(false).await);
}

#[tokio::test]
async fn stale_socket_file_is_replaced_on_bind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("broker.sock");
    std::fs::write(&socket, b"stale").expect("write stale file");

    let server = BrokerServer::new(&socket, "/bin/sh");
    let _listener = server.bind().expect("bind over stale file");
    assert!(socket.exists());
}

#[tokio::test]
async fn missing_broker_autostarts_once_then_reports_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let launcher = Arc::new(CountingLauncher::default());
    let client = client_for(&dir.path().join("absent.sock"), launcher.clone());

    assert!(!client.health(false).await);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

    let err = client
        .run_applescript("echo never", None)
        .await
        .expect_err("no broker");
    assert_eq!(err.code, PermissionErrorCode::BrokerUnavailable);
    assert!(err.message.starts_with("Broker is unavailable at "), "{}", err.message);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

    let err = client
        .send(&BrokerRequest::new(BrokerMethod::Health), false)
        .await
        .expect_err("no autostart");
    assert!(err.message.starts_with("Unable to reach broker socket "));
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exec_failure_code_is_on_the_wire() {
    let harness = start();
    let response = harness
        .client
        .send(&BrokerRequest::applescript_run("exit 2", None), false)
        .await
        .expect("response");
    assert!(!response.ok);
    assert_eq!(response.code.as_deref(), Some(CODE_EXEC_FAILED));
    assert_eq!(response.stdout.as_deref(), Some(""));
}

#[tokio::test]
async fn undecodable_requests_are_answered_with_bad_request() {
    let harness = start();
    let socket = harness.server.socket_path().to_path_buf();

    let lines: [&[u8]; 3] = [
        b"{\"id\":\"x\",\"method\":\"reboot\"}\n",
        b"nope\n",
        b"\xff\xfe\n",
    ];
    for line in lines {
        let response = raw_exchange(&socket, line).await;
        assert!(!response.ok, "{line:?}");
        assert_eq!(response.code.as_deref(), Some(CODE_BAD_REQUEST), "{line:?}");
        assert!(response.message.starts_with("Invalid broker request: "));
    }

    assert!(harness.client.health(false).await);
}
