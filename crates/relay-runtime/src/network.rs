//! Transport seam between components and the tenant backend.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One backend call: a tenant-relative path and a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub path: String,
    pub body: Value,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

/// Backend reply; components only inspect the status class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The request never produced a reply.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backend replied with a non-success status.
    #[error("backend returned status {status}")]
    Status {
        /// HTTP status code of the reply.
        status: u16,
    },
}

/// Host-provided HTTP client.
///
/// The runtime never owns sockets; shells inject whatever transport the
/// platform offers, and tests inject scripted fakes.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError>;
}

/// Send one request and collapse non-success statuses into errors.
pub async fn send_expecting_success(
    client: &dyn NetworkClient,
    request: ApiRequest,
) -> Result<ApiResponse, NetworkError> {
    let response = client.send(request).await?;
    if !response.is_success() {
        return Err(NetworkError::Status {
            status: response.status,
        });
    }
    Ok(response)
}
