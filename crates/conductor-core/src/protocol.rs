//! Control protocol: JSON-RPC 2.0 envelopes, one message per line.
//!
//! The daemon reads [`ControlRequest`]s from stdin and writes one
//! [`ControlResponse`] per request to stdout. Method dispatch lives in the
//! daemon; this module only knows the envelope and error codes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// A control request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Echoed back in the response. `null` when absent.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl ControlRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Deserialize `params` into a typed struct.
    ///
    /// Missing params are treated as an empty object so that methods whose
    /// fields are all optional accept a bare call.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, ControlError> {
        let params = if self.params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.params.clone()
        };
        serde_json::from_value(params).map_err(|e| ControlError::InvalidParams(e.to_string()))
    }
}

/// A control response: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ControlResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &ControlError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Errors surfaced over the control protocol.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    pub const fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
        }
    }
}

/// Parse one line of input into a request.
pub fn parse_request(line: &str) -> Result<ControlRequest, ControlError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| ControlError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(ControlError::InvalidRequest(
            "request must be a JSON object".to_string(),
        ));
    }
    let request: ControlRequest =
        serde_json::from_value(value).map_err(|e| ControlError::InvalidRequest(e.to_string()))?;
    if let Some(version) = &request.jsonrpc
        && version != JSONRPC_VERSION
    {
        return Err(ControlError::InvalidRequest(format!(
            "unsupported jsonrpc version {version}"
        )));
    }
    Ok(request)
}

/// Serialize a response as a single line (no trailing newline).
pub fn encode_response(response: &ControlResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32603,"message":"failed to encode response: {e}"}}}}"#
        )
    })
}
