use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide JSON-RPC request id counter, shared by every client in this
/// crate.
pub static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn next_request_id() -> RpcRequestId {
    RpcRequestId::Number(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcRequestId {
    Number(u64),
    String(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Vec<Value>>,
}

impl RpcRequest {
    pub fn new(method: &str, params: Option<Vec<Value>>) -> Self {
        RpcRequest {
            id: next_request_id(),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

impl Default for RpcRequest {
    fn default() -> Self {
        RpcRequest {
            id: RpcRequestId::Number(1),
            jsonrpc: "2.0".to_string(),
            method: "".to_string(),
            params: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorMetadata {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcSuccessResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub error: RpcErrorMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Success(RpcSuccessResponse),
    Error(RpcErrorResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_envelope_deserializes_both_arms() {
        let ok: RpcResponse =
            serde_json::from_str(r#"{"id":1,"jsonrpc":"2.0","result":"0x10"}"#).unwrap();
        assert!(matches!(ok, RpcResponse::Success(_)));

        let err: RpcResponse = serde_json::from_str(
            r#"{"id":1,"jsonrpc":"2.0","error":{"code":3,"message":"execution reverted","data":"0x08c379a0"}}"#,
        )
        .unwrap();
        match err {
            RpcResponse::Error(e) => {
                assert_eq!(e.error.code, 3);
                assert_eq!(e.error.message, "execution reverted");
            }
            RpcResponse::Success(_) => panic!("expected error arm"),
        }
    }

    #[test]
    fn request_ids_increase() {
        let a = RpcRequest::new("eth_blockNumber", None);
        let b = RpcRequest::new("eth_blockNumber", None);
        match (a.id, b.id) {
            (RpcRequestId::Number(x), RpcRequestId::Number(y)) => assert!(y > x),
            _ => panic!("expected numeric ids"),
        }
    }
}
