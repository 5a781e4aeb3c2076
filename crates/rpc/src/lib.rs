//! JSON-RPC over HTTP client with session management.
//!
//! # Design
//!
//! One [`ProtocolClient`] owns exactly one logical session with the backend.
//! The first call performs a lazy handshake (`initialize` followed by the
//! `notifications/initialized` fire-and-forget), and every later request
//! echoes the session id the server issued in a response header. When the
//! server rejects the session with a 400/401, the client clears it,
//! re-handshakes, and replays the failing call exactly once.
//!
//! The wire layer is split behind the [`Transport`] trait so the protocol
//! logic is testable without a live server. Responses arrive either as plain
//! JSON or as an event-stream frame; [`decode`] dispatches on the detected
//! format and keeps decode failures distinct from protocol failures.

pub mod client;
pub mod decode;
mod error;
mod exclusive;
pub mod protocol;
pub mod transport;

pub use client::ProtocolClient;
pub use error::RpcError;
pub use exclusive::ExclusiveRequest;
pub use protocol::{ClientInfo, InitializeParams, JsonRpcFailure, JsonRpcRequest, JsonRpcResponse};
pub use transport::{HttpTransport, Transport, WireResponse, SESSION_HEADER};
