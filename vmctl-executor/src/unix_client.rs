//! Minimal HTTP client over a Unix domain socket.
//!
//! cloud-hypervisor exposes its control API via a Unix socket, not TCP.
//! Standard HTTP clients (reqwest) don't support Unix sockets, so we
//! build a thin wrapper using hyper + tokio's `UnixStream`.

use std::path::Path;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;

use crate::ExecutorError;

/// Send an HTTP request to a control socket and return the response body.
///
/// Every call dials a fresh connection, so a refused or half-open socket
/// never poisons later calls. The whole exchange (connect, handshake,
/// request, body) is bounded by `timeout`.
///
/// Only `200 OK` and `204 No Content` count as success.
///
/// # Errors
/// Returns [`ExecutorError::ApiError`] on connection errors, timeouts, or
/// any other status code.
pub(crate) async fn api_request(
    socket_path: &Path,
    method: Method,
    uri_path: &str,
    body: Option<String>,
    timeout: Duration,
) -> Result<String, ExecutorError> {
    tokio::time::timeout(timeout, send(socket_path, method, uri_path, body))
        .await
        .map_err(|_| {
            ExecutorError::ApiError(format!(
                "{uri_path} timed out after {}ms",
                timeout.as_millis()
            ))
        })?
}

async fn send(
    socket_path: &Path,
    method: Method,
    uri_path: &str,
    body: Option<String>,
) -> Result<String, ExecutorError> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| ExecutorError::ApiError(format!("connect to {}: {e}", socket_path.display())))?;

    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ExecutorError::ApiError(format!("HTTP handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("control socket connection closed: {e}");
        }
    });

    let body_bytes = body.map(Bytes::from).unwrap_or_default();
    let content_len = body_bytes.len();

    let uri: Uri = uri_path
        .parse()
        .map_err(|e| ExecutorError::ApiError(format!("invalid URI path {uri_path}: {e}")))?;

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Host", "localhost")
        .header("Accept", "application/json");

    if content_len > 0 {
        builder = builder.header("Content-Type", "application/json");
    }
    builder = builder.header("Content-Length", content_len.to_string());

    let req = builder
        .body(Full::new(body_bytes))
        .map_err(|e| ExecutorError::ApiError(format!("build request: {e}")))?;

    let resp: Response<_> = sender
        .send_request(req)
        .await
        .map_err(|e| ExecutorError::ApiError(format!("send request: {e}")))?;

    let status = resp.status();
    let body_bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ExecutorError::ApiError(format!("read response body: {e}")))?
        .to_bytes();

    let body_str = String::from_utf8_lossy(&body_bytes).into_owned();

    if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
        return Err(ExecutorError::ApiError(format!(
            "HTTP {status} from {uri_path}: {body_str}"
        )));
    }

    Ok(body_str)
}
