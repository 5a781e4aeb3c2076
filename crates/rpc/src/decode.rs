//! Dual-format response decoding.
//!
//! The backend answers either with a plain JSON body or with an event-stream
//! body in which the structured payload rides on a `data:` line. Format
//! detection prefers the response content type and falls back to sniffing
//! the body, so a misbehaving proxy that strips headers still decodes.
//! Anything that parses as neither shape is a [`RpcError::Decode`], kept
//! distinct from protocol errors.

use crate::{error::RpcError, protocol::JsonRpcResponse};

const SSE_DATA_PREFIX: &str = "data:";
const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
  Json,
  EventStream,
}

fn detect_format(content_type: Option<&str>, body: &str) -> WireFormat {
  if let Some(ct) = content_type {
    if ct.contains(EVENT_STREAM_CONTENT_TYPE) {
      return WireFormat::EventStream;
    }
    if ct.contains(JSON_CONTENT_TYPE) {
      return WireFormat::Json;
    }
  }

  if body.lines().any(|line| line.starts_with(SSE_DATA_PREFIX)) {
    WireFormat::EventStream
  } else {
    WireFormat::Json
  }
}

/// Decode a response body into a [`JsonRpcResponse`] using the detected format.
pub fn decode_body(content_type: Option<&str>, body: &str) -> Result<JsonRpcResponse, RpcError> {
  match detect_format(content_type, body) {
    WireFormat::Json => serde_json::from_str(body).map_err(|e| RpcError::Decode(format!("invalid JSON body: {e}"))),
    WireFormat::EventStream => decode_event_stream(body),
  }
}

/// The first `data:` line's payload is the structured response.
fn decode_event_stream(body: &str) -> Result<JsonRpcResponse, RpcError> {
  for line in body.lines() {
    if let Some(payload) = line.strip_prefix(SSE_DATA_PREFIX) {
      return serde_json::from_str(payload.trim_start())
        .map_err(|e| RpcError::Decode(format!("invalid JSON in event-stream data line: {e}")));
    }
  }

  Err(RpcError::Decode("event-stream body has no data line".to_string()))
}
