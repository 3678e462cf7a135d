#[derive(Debug, thiserror::Error)]
pub enum EthClientError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    /// The node answered with a JSON-RPC error object. `data` keeps the raw
    /// revert payload when the node attached one, so pre-flight callers can
    /// recover the reason string.
    #[error("{method}: node returned an error: {message}")]
    RpcError {
        method: String,
        message: String,
        data: Option<String>,
    },
    #[error("{method}: malformed response: {detail}")]
    MalformedResponse { method: String, detail: String },
    #[error("Failed to serialize request body: {0}")]
    FailedToSerializeRequestBody(String),
    #[error("Parse Url Error. {0}")]
    ParseUrlError(String),
    #[error("Failed to sign payload: {0}")]
    FailedToSignPayload(String),
    #[error("All RPC endpoints failed")]
    FailedAllRPC,
    #[error("Timed out waiting for transaction receipt")]
    TimeoutError,
    #[error("Error: {0}")]
    Custom(String),
}
