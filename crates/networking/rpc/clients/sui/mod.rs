use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signer as _, SigningKey};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::rpc_types::{RpcRequest, RpcResponse};

type Blake2b256 = Blake2b<U32>;

/// Sui well-known shared clock object.
pub const SUI_CLOCK_OBJECT_ID: &str = "0x6";
/// Wall-clock bound on one transaction execution.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);
/// Flag byte prefixing ed25519 material in Sui serialized forms.
const ED25519_FLAG: u8 = 0x00;
/// Signing intent for user transaction data.
const TRANSACTION_DATA_INTENT: [u8; 3] = [0, 0, 0];

#[derive(Debug, Error)]
pub enum SuiClientError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Sui RPC error: {0}")]
    RpcError(String),
    #[error("Sui RPC response malformed: {0}")]
    Malformed(String),
    #[error("invalid Sui private key: {0}")]
    BadKey(String),
    #[error("transaction execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timed out waiting for transaction execution")]
    ExecutionTimeout,
    #[error("Parse Url Error. {0}")]
    ParseUrlError(String),
}

/// An ed25519 Sui signing identity. Accepts both export formats: base64 of
/// `flag ‖ secret` and the Bech32 `suiprivkey` form.
pub struct SuiKeypair {
    signing_key: SigningKey,
    address: String,
}

impl SuiKeypair {
    pub fn from_encoded(raw: &str) -> Result<Self, SuiClientError> {
        let secret = if raw.starts_with("suiprivkey") {
            use bech32::FromBase32;
            let (hrp, data, _) =
                bech32::decode(raw).map_err(|e| SuiClientError::BadKey(e.to_string()))?;
            if hrp != "suiprivkey" {
                return Err(SuiClientError::BadKey(format!(
                    "unexpected bech32 prefix {hrp}"
                )));
            }
            Vec::<u8>::from_base32(&data).map_err(|e| SuiClientError::BadKey(e.to_string()))?
        } else {
            BASE64
                .decode(raw)
                .map_err(|e| SuiClientError::BadKey(e.to_string()))?
        };

        let secret_bytes: [u8; 32] = match secret.len() {
            33 if secret[0] == ED25519_FLAG => secret[1..]
                .try_into()
                .map_err(|_| SuiClientError::BadKey("truncated secret".to_string()))?,
            32 => secret
                .as_slice()
                .try_into()
                .map_err(|_| SuiClientError::BadKey("truncated secret".to_string()))?,
            other => {
                return Err(SuiClientError::BadKey(format!(
                    "expected 32 or 33 bytes, got {other}"
                )));
            }
        };

        let signing_key = SigningKey::from_bytes(&secret_bytes);

        // Sui address: blake2b-256 over flag ‖ public key.
        let mut hasher = Blake2b256::new();
        hasher.update([ED25519_FLAG]);
        hasher.update(signing_key.verifying_key().to_bytes());
        let address = format!("0x{}", hex::encode(hasher.finalize()));

        Ok(SuiKeypair {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Serialized signature over the intent message of `tx_bytes`:
    /// base64(`flag ‖ signature ‖ pubkey`).
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> String {
        let mut hasher = Blake2b256::new();
        hasher.update(TRANSACTION_DATA_INTENT);
        hasher.update(tx_bytes);
        let digest: [u8; 32] = hasher.finalize().into();

        let signature = self.signing_key.sign(&digest);
        let mut serialized = vec![ED25519_FLAG];
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(&self.signing_key.verifying_key().to_bytes());
        BASE64.encode(serialized)
    }
}

impl std::fmt::Debug for SuiKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiKeypair").field("address", &self.address).finish()
    }
}

/// Durable position in a module's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEventCursor {
    pub tx_digest: String,
    pub event_seq: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEvent {
    pub id: SuiEventCursor,
    #[serde(default)]
    pub parsed_json: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuiEventPage {
    data: Vec<SuiEvent>,
    next_cursor: Option<SuiEventCursor>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Clone)]
pub struct SuiExecutionResult {
    pub digest: String,
    pub status_ok: bool,
    pub error: Option<String>,
}

/// Hand-rolled Sui JSON-RPC client.
#[derive(Debug, Clone)]
pub struct SuiRpcClient {
    client: Client,
    url: Url,
}

impl SuiRpcClient {
    pub fn new(url: &str) -> Result<Self, SuiClientError> {
        let url = Url::parse(url)
            .map_err(|_| SuiClientError::ParseUrlError("Failed to parse url".to_string()))?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(SuiRpcClient { client, url })
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Value, SuiClientError> {
        let request = RpcRequest::new(method, params);
        let response = self
            .client
            .post(self.url.as_str())
            .header("content-type", "application/json")
            .body(
                serde_json::to_string(&request)
                    .map_err(|e| SuiClientError::Malformed(e.to_string()))?,
            )
            .send()
            .await?
            .json::<RpcResponse>()
            .await?;

        match response {
            RpcResponse::Success(success) => Ok(success.result),
            RpcResponse::Error(error) => Err(SuiClientError::RpcError(error.error.message)),
        }
    }

    /// One ascending page of a module's events after `cursor`.
    pub async fn query_module_events(
        &self,
        package: &str,
        module: &str,
        cursor: Option<&SuiEventCursor>,
        limit: usize,
    ) -> Result<(Vec<SuiEvent>, Option<SuiEventCursor>, bool), SuiClientError> {
        let cursor_value = match cursor {
            Some(c) => json!({ "txDigest": c.tx_digest, "eventSeq": c.event_seq }),
            None => Value::Null,
        };
        let params = Some(vec![
            json!({ "MoveModule": { "package": package, "module": module } }),
            cursor_value,
            json!(limit),
            json!(false), // ascending
        ]);
        let result = self.send_request("suix_queryEvents", params).await?;
        let page: SuiEventPage = serde_json::from_value(result)
            .map_err(|e| SuiClientError::Malformed(e.to_string()))?;
        Ok((page.data, page.next_cursor, page.has_next_page))
    }

    /// Asks the node to assemble an unsigned move-call transaction, returning
    /// the BCS transaction bytes to sign.
    #[allow(clippy::too_many_arguments)]
    pub async fn build_move_call(
        &self,
        signer_address: &str,
        package: &str,
        module: &str,
        function: &str,
        type_arguments: Vec<String>,
        arguments: Vec<Value>,
        gas_object: Option<&str>,
        gas_budget: u64,
    ) -> Result<Vec<u8>, SuiClientError> {
        let params = Some(vec![
            json!(signer_address),
            json!(package),
            json!(module),
            json!(function),
            json!(type_arguments),
            json!(arguments),
            gas_object.map(|g| json!(g)).unwrap_or(Value::Null),
            json!(gas_budget.to_string()),
        ]);
        let result = self.send_request("unsafe_moveCall", params).await?;
        let tx_bytes = result
            .pointer("/txBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| SuiClientError::Malformed("unsafe_moveCall missing txBytes".to_string()))?;
        BASE64
            .decode(tx_bytes)
            .map_err(|e| SuiClientError::Malformed(e.to_string()))
    }

    /// Signs and executes a transaction block, waiting for effects. Success
    /// means `effects.status.status == "success"` and a non-empty digest.
    pub async fn execute_transaction_block(
        &self,
        tx_bytes: &[u8],
        keypair: &SuiKeypair,
    ) -> Result<SuiExecutionResult, SuiClientError> {
        let signature = keypair.sign_transaction(tx_bytes);
        let params = Some(vec![
            json!(BASE64.encode(tx_bytes)),
            json!([signature]),
            json!({ "showEffects": true }),
            json!("WaitForLocalExecution"),
        ]);

        let execute = self.send_request("sui_executeTransactionBlock", params);
        let result = tokio::time::timeout(EXECUTION_TIMEOUT, execute)
            .await
            .map_err(|_| SuiClientError::ExecutionTimeout)??;

        let digest = result
            .pointer("/digest")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = result
            .pointer("/effects/status/status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let error = result
            .pointer("/effects/status/error")
            .and_then(Value::as_str)
            .map(str::to_string);

        debug!(%digest, status, "Sui transaction executed");
        Ok(SuiExecutionResult {
            status_ok: status == "success" && !digest.is_empty(),
            digest,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key_base64() -> String {
        let mut raw = vec![ED25519_FLAG];
        raw.extend_from_slice(&[5u8; 32]);
        BASE64.encode(raw)
    }

    #[test]
    fn keypair_from_base64_derives_stable_address() {
        let a = SuiKeypair::from_encoded(&test_key_base64()).unwrap();
        let b = SuiKeypair::from_encoded(&test_key_base64()).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(a.address().starts_with("0x"));
        assert_eq!(a.address().len(), 66);
    }

    #[test]
    fn signature_serialization_shape() {
        let keypair = SuiKeypair::from_encoded(&test_key_base64()).unwrap();
        let signature = keypair.sign_transaction(b"tx-bytes");
        let decoded = BASE64.decode(signature).unwrap();
        assert_eq!(decoded.len(), 1 + 64 + 32);
        assert_eq!(decoded[0], ED25519_FLAG);
        assert_eq!(
            &decoded[65..],
            keypair.signing_key.verifying_key().to_bytes()
        );
    }

    #[test]
    fn garbage_keys_are_rejected() {
        assert!(SuiKeypair::from_encoded("not base64 at all!!!").is_err());
        let short = BASE64.encode([1u8; 5]);
        assert!(SuiKeypair::from_encoded(&short).is_err());
    }

    #[test]
    fn event_page_deserializes() {
        let json = r#"{
            "data": [
                {"id": {"txDigest": "9oBq", "eventSeq": "0"}, "parsedJson": {"sender": "0xaa"}}
            ],
            "nextCursor": {"txDigest": "9oBq", "eventSeq": "0"},
            "hasNextPage": false
        }"#;
        let page: SuiEventPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_cursor.unwrap().tx_digest, "9oBq");
        assert!(!page.has_next_page);
    }
}
