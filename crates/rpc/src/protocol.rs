//! JSON-RPC 2.0 request/response shapes and the method names the client uses.

use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

pub mod methods {
  pub const INITIALIZE: &str = "initialize";
  pub const INITIALIZED: &str = "notifications/initialized";
  pub const TOOLS_CALL: &str = "tools/call";
  pub const RESOURCES_READ: &str = "resources/read";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
  pub jsonrpc: String,
  pub method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub params: Option<serde_json::Value>,
  /// Correlation id. Absent on notifications, which expect no response.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
}

impl JsonRpcRequest {
  pub fn call(id: u64, method: &str, params: serde_json::Value) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.to_string(),
      method: method.to_string(),
      params: Some(params),
      id: Some(id),
    }
  }

  pub fn notification(method: &str) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION.to_string(),
      method: method.to_string(),
      params: None,
      id: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
  #[serde(default)]
  pub jsonrpc: Option<String>,
  #[serde(default)]
  pub id: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<JsonRpcFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcFailure {
  pub code: i64,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<serde_json::Value>,
}

/// Handshake payload: protocol version, declared capabilities, and who we are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
  pub protocol_version: String,
  pub capabilities: serde_json::Value,
  pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
  pub name: String,
  pub version: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_call_serializes_with_id() {
    let req = JsonRpcRequest::call(7, methods::TOOLS_CALL, serde_json::json!({"name": "index_file"}));
    let value = serde_json::to_value(&req).unwrap();

    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["method"], "tools/call");
    assert_eq!(value["id"], 7);
    assert_eq!(value["params"]["name"], "index_file");
  }

  #[test]
  fn test_notification_omits_id_and_params() {
    let req = JsonRpcRequest::notification(methods::INITIALIZED);
    let value = serde_json::to_value(&req).unwrap();

    assert_eq!(value["method"], "notifications/initialized");
    assert!(value.get("id").is_none());
    assert!(value.get("params").is_none());
  }

  #[test]
  fn test_initialize_params_use_camel_case() {
    let params = InitializeParams {
      protocol_version: "2025-03-26".to_string(),
      capabilities: serde_json::json!({}),
      client_info: ClientInfo {
        name: "tether".to_string(),
        version: "0.1.0".to_string(),
      },
    };
    let value = serde_json::to_value(&params).unwrap();

    assert_eq!(value["protocolVersion"], "2025-03-26");
    assert_eq!(value["clientInfo"]["name"], "tether");
  }

  #[test]
  fn test_response_parses_error_object() {
    let body = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"method not found"}}"#;
    let response: JsonRpcResponse = serde_json::from_str(body).unwrap();

    assert!(response.result.is_none());
    let failure = response.error.unwrap();
    assert_eq!(failure.code, -32601);
    assert_eq!(failure.message, "method not found");
  }
}
