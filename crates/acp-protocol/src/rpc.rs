//! Newline-delimited JSON RPC envelope.
//!
//! One request per line, one response per request id. The dispatcher is
//! single-threaded per connection and preserves response ordering per id.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Response envelope statuses used by tool-facing methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodStatus {
    Ok,
    Accepted,
    Error,
    Forbidden,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_default_params() {
        let req: RpcRequest = serde_json::from_str(r#"{"id": 7, "method": "status"}"#).unwrap();
        assert_eq!(req.id, 7);
        assert_eq!(req.method, "status");
        assert!(req.params.is_null());
    }

    #[test]
    fn ok_response_omits_error() {
        let resp = RpcResponse::ok(1, serde_json::json!({"healthy": true}));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["result"]["healthy"], true);
    }

    #[test]
    fn error_response_carries_code() {
        let resp = RpcResponse::err(2, "forbidden", "agent not allowed");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], "forbidden");
        assert!(json.get("result").is_none());
    }
}
