//! HTTP client for the management API, used by the `vmctl` CLI.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use vmctl_core::{CoreError, DestroyAllResponse, ErrorBody, StartVmRequest, VmInfo, VmName};

/// Errors returned by [`VmctlClient`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The server address is not an `http://host:port` URL.
    #[error("invalid server address {0:?}")]
    InvalidServer(String),

    /// The VM name was rejected locally.
    #[error(transparent)]
    InvalidName(#[from] CoreError),

    /// The request never got a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with an error.
    #[error("{message} ({kind}, HTTP {status})")]
    Api { status: u16, kind: String, message: String },

    /// The response body was not what the API promises.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Management API client.
#[derive(Debug, Clone)]
pub struct VmctlClient {
    base: String,
    http: Client<HttpConnector, Full<Bytes>>,
}

impl VmctlClient {
    /// Create a client for the server at `server`, e.g. `http://127.0.0.1:3456`.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidServer`] if `server` is not an
    /// `http://` URL.
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let base = server.trim_end_matches('/').to_owned();
        let uri: hyper::Uri = base.parse().map_err(|_| ClientError::InvalidServer(server.to_owned()))?;
        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(ClientError::InvalidServer(server.to_owned()));
        }
        let http = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { base, http })
    }

    /// Start a VM.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidName`] for a bad name, or the API error.
    pub async fn start(&self, name: &str, entry_point: Option<&str>) -> Result<VmInfo, ClientError> {
        let request = StartVmRequest { name: VmName::new(name)?, entry_point: entry_point.map(str::to_owned) };
        let body = serde_json::to_vec(&request).map_err(|e| ClientError::Decode(e.to_string()))?;
        let (status, bytes) = self.send(Method::POST, "/v1/vms", Some(body)).await?;
        expect_status(status, StatusCode::CREATED, &bytes)?;
        decode(&bytes)
    }

    /// Stop a running VM.
    ///
    /// # Errors
    /// Returns the API error.
    pub async fn stop(&self, name: &str) -> Result<(), ClientError> {
        let name = VmName::new(name)?;
        let (status, bytes) = self.send(Method::POST, &format!("/v1/vms/{name}/stop"), None).await?;
        expect_status(status, StatusCode::NO_CONTENT, &bytes)
    }

    /// Destroy a VM.
    ///
    /// # Errors
    /// Returns the API error.
    pub async fn destroy(&self, name: &str) -> Result<(), ClientError> {
        let name = VmName::new(name)?;
        let (status, bytes) = self.send(Method::DELETE, &format!("/v1/vms/{name}"), None).await?;
        expect_status(status, StatusCode::NO_CONTENT, &bytes)
    }

    /// Destroy every VM. A partial failure is returned as a report, not an
    /// error.
    ///
    /// # Errors
    /// Returns transport or decode errors.
    pub async fn destroy_all(&self) -> Result<DestroyAllResponse, ClientError> {
        let (status, bytes) = self.send(Method::DELETE, "/v1/vms", None).await?;
        if status != StatusCode::OK && status != StatusCode::INTERNAL_SERVER_ERROR {
            return Err(api_error(status, &bytes));
        }
        decode(&bytes)
    }

    /// Describe one VM.
    ///
    /// # Errors
    /// Returns the API error.
    pub async fn list(&self, name: &str) -> Result<VmInfo, ClientError> {
        let name = VmName::new(name)?;
        let (status, bytes) = self.send(Method::GET, &format!("/v1/vms/{name}"), None).await?;
        expect_status(status, StatusCode::OK, &bytes)?;
        decode(&bytes)
    }

    /// Describe every VM.
    ///
    /// # Errors
    /// Returns the API error.
    pub async fn list_all(&self) -> Result<Vec<VmInfo>, ClientError> {
        let (status, bytes) = self.send(Method::GET, "/v1/vms", None).await?;
        expect_status(status, StatusCode::OK, &bytes)?;
        decode(&bytes)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let mut builder = Request::builder().method(method).uri(format!("{}{path}", self.base));
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let response = self.http.request(request).await.map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_bytes();
        Ok((status, bytes))
    }
}

fn expect_status(status: StatusCode, expected: StatusCode, bytes: &[u8]) -> Result<(), ClientError> {
    if status == expected {
        Ok(())
    } else {
        Err(api_error(status, bytes))
    }
}

fn api_error(status: StatusCode, bytes: &[u8]) -> ClientError {
    match serde_json::from_slice::<ErrorBody>(bytes) {
        Ok(body) => ClientError::Api { status: status.as_u16(), kind: body.kind, message: body.error },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            kind: "unknown".to_owned(),
            message: String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

/// One-line summary printed by the CLI.
#[must_use]
pub fn describe(info: &VmInfo) -> String {
    format!(
        "VM: Name={}, Status={}, IP={}, TapDevice={}",
        info.name,
        info.status.label(),
        info.ip,
        info.tap_device
    )
}
