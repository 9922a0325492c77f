//! Axum route handlers for the vmctl management API.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use vmctl_core::VmName;
use vmctl_executor::{ExecutorError, VmOrchestrator, VmmBackend};

use crate::error::GatewayError;

/// Longest accepted launch profile.
pub const MAX_ENTRY_POINT_LEN: usize = 256;

// ── Shared state ─────────────────────────────────────────────────────────────

/// State shared by every handler.
pub struct AppState<B: VmmBackend> {
    pub orchestrator: Arc<VmOrchestrator<B>>,
    /// Deadline of a start request, after which the boot is cancelled.
    pub request_timeout: Duration,
}

impl<B: VmmBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self { orchestrator: Arc::clone(&self.orchestrator), request_timeout: self.request_timeout }
    }
}

// ── Request types ─────────────────────────────────────────────────────────────

/// Raw `POST /v1/vms` body; the name is validated separately so that a bad
/// name reports `invalid_name` rather than a generic parse error.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StartBody {
    name: String,
    #[serde(default)]
    entry_point: Option<String>,
}

/// Parse and validate a start request body.
///
/// # Errors
/// Returns [`GatewayError::InvalidRequest`] for malformed JSON or an
/// unusable launch profile, and an `invalid_name` error for a bad name.
pub fn parse_start_body(bytes: &[u8]) -> Result<(VmName, Option<String>), GatewayError> {
    let body: StartBody = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed body: {e}")))?;
    let name = VmName::new(body.name).map_err(ExecutorError::from)?;
    if let Some(entry_point) = &body.entry_point {
        validate_entry_point(entry_point)?;
    }
    Ok((name, body.entry_point))
}

fn validate_entry_point(entry_point: &str) -> Result<(), GatewayError> {
    if entry_point.is_empty() {
        return Err(GatewayError::InvalidRequest("entry_point must not be empty".to_owned()));
    }
    if entry_point.len() > MAX_ENTRY_POINT_LEN {
        return Err(GatewayError::InvalidRequest(format!(
            "entry_point longer than {MAX_ENTRY_POINT_LEN} bytes"
        )));
    }
    // It lands on the kernel command line as a single parameter.
    if entry_point.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(GatewayError::InvalidRequest(
            "entry_point must not contain whitespace or control characters".to_owned(),
        ));
    }
    Ok(())
}

fn parse_name(raw: String) -> Result<VmName, GatewayError> {
    VmName::new(raw).map_err(|e| GatewayError::from(ExecutorError::from(e)))
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router over the given orchestrator.
pub fn create_router<B: VmmBackend>(orchestrator: Arc<VmOrchestrator<B>>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/v1/vms", post(start_vm::<B>).get(list_all_vms::<B>).delete(destroy_all_vms::<B>))
        .route("/v1/vms/{name}", get(list_vm::<B>).delete(destroy_vm::<B>))
        .route("/v1/vms/{name}/stop", post(stop_vm::<B>))
        .route("/health", get(health))
        .with_state(AppState { orchestrator, request_timeout })
        .layer(TraceLayer::new_for_http())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// `POST /v1/vms`: create and boot a VM.
///
/// The boot runs on its own task. If this request is dropped (client
/// disconnect) or outlives the request deadline, the boot is cancelled and
/// the half-started VM is torn down.
///
/// # Errors
/// Returns [`GatewayError::InvalidRequest`] for a bad body, or any start
/// error from the orchestrator.
pub async fn start_vm<B: VmmBackend>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let (name, entry_point) = parse_start_body(&body)?;

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let task_cancel = cancel.clone();
    let orchestrator = Arc::clone(&state.orchestrator);
    let mut task = tokio::spawn(async move { orchestrator.start(name, entry_point, &task_cancel).await });

    let joined = match tokio::time::timeout(state.request_timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.request_timeout.as_millis(),
                "start exceeded request deadline, cancelling"
            );
            cancel.cancel();
            task.await
        }
    };
    let info = joined.map_err(|e| GatewayError::Internal(format!("start task failed: {e}")))??;
    Ok((StatusCode::CREATED, Json(info)))
}

/// `GET /v1/vms`: every registered VM.
pub async fn list_all_vms<B: VmmBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    Json(state.orchestrator.list_all())
}

/// `GET /v1/vms/{name}`: one VM.
///
/// # Errors
/// Returns a not-found error if the name is not registered.
pub async fn list_vm<B: VmmBackend>(
    State(state): State<AppState<B>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let name = parse_name(name)?;
    Ok(Json(state.orchestrator.list(&name)?))
}

/// `POST /v1/vms/{name}/stop`: stop a running VM.
///
/// # Errors
/// Returns a not-found or invalid-state error, or the termination failure.
pub async fn stop_vm<B: VmmBackend>(
    State(state): State<AppState<B>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let name = parse_name(name)?;
    state.orchestrator.stop(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /v1/vms/{name}`: destroy a VM.
///
/// # Errors
/// Returns a not-found error, or the termination failure.
pub async fn destroy_vm<B: VmmBackend>(
    State(state): State<AppState<B>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let name = parse_name(name)?;
    state.orchestrator.destroy(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /v1/vms`: destroy every VM. Answers 500 if any teardown failed.
pub async fn destroy_all_vms<B: VmmBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    let report = state.orchestrator.destroy_all().await;
    let status = if report.failed.is_empty() { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use std::path::PathBuf;
    use tower::ServiceExt;
    use vmctl_executor::mock::{MockBackend, MockBehavior};
    use vmctl_executor::{GuestConfig, OrchestratorConfig};

    struct TestApp {
        app: Router,
        orchestrator: Arc<VmOrchestrator<MockBackend>>,
        _dir: tempfile::TempDir,
    }

    fn test_app_with(behavior: MockBehavior, readiness: Duration, request_timeout: Duration) -> TestApp {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir failed: {e}"),
        };
        let guest = GuestConfig::new(PathBuf::from("/k"), PathBuf::from("/r"));
        let mut config = OrchestratorConfig::new(dir.path().to_owned(), guest);
        config.readiness_timeout = readiness;
        config.readiness_interval = Duration::from_millis(5);
        let orchestrator = match VmOrchestrator::new(MockBackend::with_behavior(behavior), config) {
            Ok(o) => Arc::new(o),
            Err(e) => panic!("orchestrator construction failed: {e}"),
        };
        let app = create_router(Arc::clone(&orchestrator), request_timeout);
        TestApp { app, orchestrator, _dir: dir }
    }

    fn test_app() -> TestApp {
        test_app_with(MockBehavior::default(), Duration::from_secs(2), Duration::from_secs(5))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let req = match Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_owned())))
        {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        };
        let resp = match app.clone().oneshot(req).await {
            Ok(r) => r,
            Err(e) => panic!("handler error: {e}"),
        };
        let status = resp.status();
        let bytes = match axum::body::to_bytes(resp.into_body(), 64 * 1024).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(e) => panic!("invalid JSON: {e}"),
            }
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_response_format_returns_ok_with_status_field() {
        let t = test_app();
        let (status, body) = send(&t.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn lifecycle_over_http() {
        let t = test_app();

        let (status, body) = send(&t.app, "POST", "/v1/vms", Some(r#"{"name":"vm1","entry_point":"python3"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "vm1");
        assert_eq!(body["status"], "running");
        assert_eq!(body["tap_device"], "vmtap0");
        assert_eq!(body["entry_point"], "python3");

        let (status, body) = send(&t.app, "GET", "/v1/vms", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (status, _) = send(&t.app, "POST", "/v1/vms/vm1/stop", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&t.app, "GET", "/v1/vms/vm1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");

        let (status, _) = send(&t.app, "DELETE", "/v1/vms/vm1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&t.app, "GET", "/v1/vms/vm1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn duplicate_start_is_conflict() {
        let t = test_app();
        let (first, _) = send(&t.app, "POST", "/v1/vms", Some(r#"{"name":"vm1"}"#)).await;
        assert_eq!(first, StatusCode::CREATED);
        let (second, body) = send(&t.app, "POST", "/v1/vms", Some(r#"{"name":"vm1"}"#)).await;
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "already_exists");
    }

    #[tokio::test]
    async fn bad_requests_are_rejected_before_orchestration() {
        let t = test_app();
        let cases = [
            (r#"{"name":"../etc"}"#, "invalid_name"),
            (r#"{"name":""}"#, "invalid_name"),
            (r#"{"name":"vm1","entry_point":"rm -rf"}"#, "invalid_request"),
            (r#"{"name":"vm1","entry_point":""}"#, "invalid_request"),
            (r#"{"nom":"vm1"}"#, "invalid_request"),
            ("not json", "invalid_request"),
        ];
        for (body, kind) in cases {
            let (status, resp) = send(&t.app, "POST", "/v1/vms", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(resp["kind"], kind, "{body}");
        }
        assert_eq!(t.orchestrator.active_count(), 0);
    }

    #[tokio::test]
    async fn stop_of_stopped_vm_is_conflict() {
        let t = test_app();
        send(&t.app, "POST", "/v1/vms", Some(r#"{"name":"vm1"}"#)).await;
        send(&t.app, "POST", "/v1/vms/vm1/stop", None).await;
        let (status, body) = send(&t.app, "POST", "/v1/vms/vm1/stop", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_state");
    }

    #[tokio::test]
    async fn readiness_timeout_is_gateway_timeout() {
        let behavior = MockBehavior { never_ready: true, ..MockBehavior::default() };
        let t = test_app_with(behavior, Duration::from_millis(100), Duration::from_secs(5));
        let (status, body) = send(&t.app, "POST", "/v1/vms", Some(r#"{"name":"vm1"}"#)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["kind"], "start_timeout");
        assert_eq!(t.orchestrator.active_count(), 0);
    }

    #[tokio::test]
    async fn request_deadline_cancels_start() {
        let behavior = MockBehavior { never_ready: true, ..MockBehavior::default() };
        let t = test_app_with(behavior, Duration::from_secs(30), Duration::from_millis(100));
        let started = std::time::Instant::now();
        let (status, body) = send(&t.app, "POST", "/v1/vms", Some(r#"{"name":"vm1"}"#)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["kind"], "start_timeout");
        assert!(started.elapsed() < Duration::from_secs(5), "deadline must cut the readiness wait short");
        assert_eq!(t.orchestrator.active_count(), 0);
        assert_eq!(t.orchestrator.backend().live(), 0);
    }

    #[tokio::test]
    async fn destroy_all_reports_partial_failure_as_500() {
        let mut behavior = MockBehavior::default();
        behavior.terminate_fails_for.insert("stuck".to_owned());
        let t = test_app_with(behavior, Duration::from_secs(2), Duration::from_secs(5));
        for name in ["ok1", "stuck", "ok2"] {
            let (status, _) = send(&t.app, "POST", "/v1/vms", Some(&format!(r#"{{"name":"{name}"}}"#))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = send(&t.app, "DELETE", "/v1/vms", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["destroyed"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["failed"][0]["name"], "stuck");
    }

    #[tokio::test]
    async fn destroy_all_on_empty_registry_is_ok() {
        let t = test_app();
        let (status, body) = send(&t.app, "DELETE", "/v1/vms", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["destroyed"], serde_json::json!([]));
    }

    #[test]
    fn parse_start_body_accepts_minimal_request() {
        match parse_start_body(br#"{"name":"vm1"}"#) {
            Ok((name, entry_point)) => {
                assert_eq!(name.as_str(), "vm1");
                assert!(entry_point.is_none());
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
