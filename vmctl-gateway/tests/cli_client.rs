//! The `vmctl` client against a live gateway backed by the mock hypervisor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vmctl_core::VmStatus;
use vmctl_executor::mock::{MockBackend, MockBehavior};
use vmctl_executor::{GuestConfig, OrchestratorConfig, VmOrchestrator};
use vmctl_gateway::client::{describe, ClientError, VmctlClient};
use vmctl_gateway::routes::create_router;

struct Server {
    client: VmctlClient,
    _dir: tempfile::TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(behavior: MockBehavior) -> Server {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir failed: {e}"),
    };
    let config = OrchestratorConfig::new(
        dir.path().to_owned(),
        GuestConfig::new(PathBuf::from("/k"), PathBuf::from("/r")),
    );
    let orchestrator = match VmOrchestrator::new(MockBackend::with_behavior(behavior), config) {
        Ok(o) => Arc::new(o),
        Err(e) => panic!("orchestrator construction failed: {e}"),
    };
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind failed: {e}"),
    };
    let addr = match listener.local_addr() {
        Ok(a) => a,
        Err(e) => panic!("local_addr failed: {e}"),
    };
    let app = create_router(orchestrator, Duration::from_secs(5));
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let client = match VmctlClient::new(&format!("http://{addr}")) {
        Ok(c) => c,
        Err(e) => panic!("client construction failed: {e}"),
    };
    Server { client, _dir: dir, task }
}

#[tokio::test]
async fn client_drives_full_lifecycle() {
    let server = serve(MockBehavior::default()).await;
    let client = &server.client;

    let info = match client.start("vm1", Some("python3")).await {
        Ok(i) => i,
        Err(e) => panic!("start failed: {e}"),
    };
    assert_eq!(describe(&info), "VM: Name=vm1, Status=RUNNING, IP=172.20.0.2, TapDevice=vmtap0");

    let all = match client.list_all().await {
        Ok(all) => all,
        Err(e) => panic!("list-all failed: {e}"),
    };
    assert_eq!(all.len(), 1);

    assert!(client.stop("vm1").await.is_ok());
    assert!(matches!(client.list("vm1").await, Ok(i) if i.status == VmStatus::Stopped));
    assert!(client.destroy("vm1").await.is_ok());

    let missing = client.list("vm1").await;
    assert!(
        matches!(&missing, Err(ClientError::Api { status: 404, kind, .. }) if kind == "not_found"),
        "got {missing:?}"
    );
}

#[tokio::test]
async fn client_reports_conflicts_and_local_name_errors() {
    let server = serve(MockBehavior::default()).await;
    let client = &server.client;

    assert!(client.start("vm1", None).await.is_ok());
    let dup = client.start("vm1", None).await;
    assert!(
        matches!(&dup, Err(ClientError::Api { status: 409, kind, .. }) if kind == "already_exists"),
        "got {dup:?}"
    );

    assert!(matches!(client.stop("no/such").await, Err(ClientError::InvalidName(_))));
}

#[tokio::test]
async fn destroy_all_returns_partial_report() {
    let mut behavior = MockBehavior::default();
    behavior.terminate_fails_for.insert("stuck".to_owned());
    let server = serve(behavior).await;
    let client = &server.client;

    for name in ["a", "stuck"] {
        assert!(client.start(name, None).await.is_ok());
    }
    let report = match client.destroy_all().await {
        Ok(r) => r,
        Err(e) => panic!("destroy-all failed: {e}"),
    };
    assert_eq!(report.destroyed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name.as_str(), "stuck");
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let client = match VmctlClient::new("http://127.0.0.1:9") {
        Ok(c) => c,
        Err(e) => panic!("client construction failed: {e}"),
    };
    assert!(matches!(client.list_all().await, Err(ClientError::Transport(_))));
}
