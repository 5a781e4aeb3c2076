//! Session-managed JSON-RPC client.
//!
//! # Design
//!
//! Session state lives behind a tokio mutex so a handshake is never issued
//! twice concurrently: callers racing into `initialize` queue on the lock,
//! and all but the first observe the initialized flag and return. The mutex
//! is held across the handshake round trip on purpose — that is the
//! single-flight guarantee.
//!
//! Recovery is intentionally narrow: a 400/401 on a non-handshake call clears
//! the session, re-handshakes, and replays the original call exactly once.
//! Every other failure propagates untouched; pacing and retry budgets belong
//! to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use tether_core::RpcConfig;

use crate::{
  decode,
  error::RpcError,
  protocol::{methods, ClientInfo, InitializeParams, JsonRpcRequest},
  transport::{HttpTransport, Transport, WireResponse},
};

#[derive(Debug, Default)]
struct SessionState {
  session: Option<String>,
  initialized: bool,
}

pub struct ProtocolClient<T: Transport> {
  transport: T,
  config: RpcConfig,
  state: Mutex<SessionState>,
  next_id: AtomicU64,
}

impl ProtocolClient<HttpTransport> {
  /// Construct a client over a real HTTP transport.
  pub fn connect(config: RpcConfig) -> Result<Self, RpcError> {
    let transport = HttpTransport::new(&config)?;
    Ok(Self::with_transport(transport, config))
  }
}

impl<T: Transport> ProtocolClient<T> {
  pub fn with_transport(transport: T, config: RpcConfig) -> Self {
    Self {
      transport,
      config,
      state: Mutex::new(SessionState::default()),
      next_id: AtomicU64::new(1),
    }
  }

  fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  /// Perform the handshake if it has not happened yet.
  ///
  /// Idempotent; concurrent callers share one attempt.
  pub async fn initialize(&self) -> Result<(), RpcError> {
    let mut state = self.state.lock().await;
    if state.initialized {
      return Ok(());
    }
    self.handshake(&mut state).await
  }

  /// Drop the session and initialized flag; the next call re-handshakes.
  pub async fn clear_session(&self) {
    let mut state = self.state.lock().await;
    state.session = None;
    state.initialized = false;
  }

  /// Current session id, if the handshake has issued one.
  pub async fn session(&self) -> Option<String> {
    self.state.lock().await.session.clone()
  }

  /// Send one request and decode the result, recovering a rejected session
  /// at most once.
  pub async fn call_method(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    self.initialize().await?;

    match self.dispatch(method, params.clone()).await {
      Err(RpcError::Session { status }) => {
        warn!(status, method, "Session rejected, re-initializing and replaying once");
        {
          let mut state = self.state.lock().await;
          state.session = None;
          state.initialized = false;
          self.handshake(&mut state).await?;
        }
        self.dispatch(method, params).await
      }
      other => other,
    }
  }

  /// Invoke a named tool with a JSON argument object.
  pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    self
      .call_method(
        methods::TOOLS_CALL,
        serde_json::json!({ "name": name, "arguments": arguments }),
      )
      .await
  }

  /// Read a resource by URI. Used for status and diagnostic queries.
  pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, RpcError> {
    self
      .call_method(methods::RESOURCES_READ, serde_json::json!({ "uri": uri }))
      .await
  }

  /// One request/response round trip, no recovery.
  async fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let id = self.next_id();
    let session = self.state.lock().await.session.clone();

    let request = JsonRpcRequest::call(id, method, params);
    let body = serde_json::to_string(&request)?;

    debug!(id, method, has_session = session.is_some(), "Dispatching request");
    let wire = self.transport.send(body, session.as_deref()).await?;

    let response = Self::classify(wire)?;

    if let Some(rid) = response.id.as_ref().and_then(|v| v.as_u64())
      && rid != id
    {
      return Err(RpcError::Decode(format!(
        "correlation mismatch: sent id {id}, response carried {rid}"
      )));
    }

    if let Some(failure) = response.error {
      return Err(RpcError::Application {
        code: failure.code,
        message: failure.message,
      });
    }

    response
      .result
      .ok_or_else(|| RpcError::Decode("response carried neither result nor error".to_string()))
  }

  /// Map a wire response to a decoded payload or the right error class.
  fn classify(wire: WireResponse) -> Result<crate::protocol::JsonRpcResponse, RpcError> {
    if wire.status == 400 || wire.status == 401 {
      return Err(RpcError::Session { status: wire.status });
    }
    if !wire.is_success() {
      return Err(RpcError::Protocol {
        status: wire.status,
        body: wire.body,
      });
    }

    decode::decode_body(wire.content_type.as_deref(), &wire.body)
  }

  /// The handshake round trip plus the fire-and-forget initialized
  /// notification. Called with the session lock held.
  async fn handshake(&self, state: &mut SessionState) -> Result<(), RpcError> {
    let params = InitializeParams {
      protocol_version: self.config.protocol_version.clone(),
      capabilities: serde_json::json!({}),
      client_info: ClientInfo {
        name: self.config.client_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
      },
    };

    let id = self.next_id();
    let request = JsonRpcRequest::call(id, methods::INITIALIZE, serde_json::to_value(&params)?);
    let body = serde_json::to_string(&request)?;

    debug!(id, protocol_version = %self.config.protocol_version, "Performing handshake");
    let wire = self.transport.send(body, state.session.as_deref()).await?;

    // Session id comes back in transport metadata on first issue
    let issued = wire.session.clone();
    let response = Self::classify(wire)?;

    if let Some(failure) = response.error {
      return Err(RpcError::Application {
        code: failure.code,
        message: failure.message,
      });
    }

    if let Some(session) = issued
      && state.session.is_none()
    {
      debug!("Session established");
      state.session = Some(session);
    }

    // Best-effort: a failed notification is logged, not fatal
    let note = serde_json::to_string(&JsonRpcRequest::notification(methods::INITIALIZED))?;
    match self.transport.send(note, state.session.as_deref()).await {
      Ok(wire) if !wire.is_success() => {
        warn!(status = wire.status, "Initialized notification rejected");
      }
      Err(e) => {
        warn!(err = %e, "Initialized notification failed");
      }
      Ok(_) => {}
    }

    state.initialized = true;
    Ok(())
  }
}
