//! HTTP POST transport for the JSON-RPC endpoint.
//!
//! The [`Transport`] trait is the seam between protocol logic and the wire:
//! the real implementation is a thin reqwest wrapper, and tests substitute a
//! scripted mock.

use async_trait::async_trait;
use tether_core::RpcConfig;

use crate::error::RpcError;

/// Header carrying the backend-issued session id, both directions.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// What came back from one HTTP exchange, before any protocol decoding.
#[derive(Debug, Clone)]
pub struct WireResponse {
  pub status: u16,
  /// Session id from the response headers, when the server issued one
  pub session: Option<String>,
  pub content_type: Option<String>,
  pub body: String,
}

impl WireResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

#[async_trait]
pub trait Transport: Send + Sync {
  /// POST a serialized request body, echoing `session` when one exists.
  async fn send(&self, body: String, session: Option<&str>) -> Result<WireResponse, RpcError>;
}

/// Production transport backed by a pooled reqwest client.
pub struct HttpTransport {
  client: reqwest::Client,
  endpoint: String,
}

impl HttpTransport {
  pub fn new(config: &RpcConfig) -> Result<Self, RpcError> {
    let client = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .build()
      .map_err(|e| RpcError::Transport(e.to_string()))?;

    Ok(Self {
      client,
      endpoint: config.endpoint.clone(),
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, body: String, session: Option<&str>) -> Result<WireResponse, RpcError> {
    let mut request = self
      .client
      .post(&self.endpoint)
      .header("Content-Type", "application/json")
      .header("Accept", "application/json, text/event-stream")
      .body(body);

    if let Some(session) = session {
      request = request.header(SESSION_HEADER, session);
    }

    let response = request.send().await.map_err(|e| RpcError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let session = response
      .headers()
      .get(SESSION_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response.text().await.map_err(|e| RpcError::Transport(e.to_string()))?;

    Ok(WireResponse {
      status,
      session,
      content_type,
      body,
    })
  }
}
