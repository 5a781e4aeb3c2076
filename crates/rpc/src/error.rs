/// Errors surfaced by the RPC layer.
///
/// The variants deliberately separate "the network failed" (`Transport`),
/// "the server said no" (`Protocol`, `Session`, `Application`) and "we could
/// not understand the server" (`Decode`), so callers can pick a remediation
/// per class. Only `Session` gets automatic remediation, inside
/// [`crate::ProtocolClient`] itself.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("server returned status {status}: {body}")]
  Protocol { status: u16, body: String },

  #[error("session rejected with status {status}")]
  Session { status: u16 },

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("server error {code}: {message}")]
  Application { code: i64, message: String },
}

impl RpcError {
  pub fn is_session(&self) -> bool {
    matches!(self, RpcError::Session { .. })
  }

  /// HTTP 429 from the backend. The sync engine pauses for a cooldown when
  /// it sees this instead of hammering the endpoint.
  pub fn is_rate_limit(&self) -> bool {
    matches!(self, RpcError::Protocol { status: 429, .. })
  }
}

impl From<serde_json::Error> for RpcError {
  fn from(e: serde_json::Error) -> Self {
    RpcError::Decode(e.to_string())
  }
}
