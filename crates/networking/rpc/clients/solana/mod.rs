use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Url};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::rpc_types::{RpcRequest, RpcResponse};
use tbtc_relay_common::types::SolanaCommitment;

pub mod tx;

pub use tx::{AccountMeta, Instruction, Keypair, Message, Pubkey, Transaction};

const SIGNATURE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Wall-clock bound on one confirmation wait.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SolanaClientError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Solana RPC error: {0}")]
    RpcError(String),
    #[error("Solana RPC response malformed: {0}")]
    Malformed(String),
    #[error("transaction error: {0}")]
    TxError(#[from] tx::SolanaTxError),
    #[error("timed out waiting for transaction confirmation")]
    ConfirmationTimeout,
    #[error("Parse Url Error. {0}")]
    ParseUrlError(String),
}

/// Hand-rolled Solana JSON-RPC client. Same request envelopes as the
/// Ethereum client; reads take the configured commitment level.
#[derive(Debug, Clone)]
pub struct SolanaRpcClient {
    client: Client,
    url: Url,
    commitment: SolanaCommitment,
}

impl SolanaRpcClient {
    pub fn new(url: &str, commitment: SolanaCommitment) -> Result<Self, SolanaClientError> {
        let url = Url::parse(url)
            .map_err(|_| SolanaClientError::ParseUrlError("Failed to parse url".to_string()))?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(SolanaRpcClient {
            client,
            url,
            commitment,
        })
    }

    pub fn commitment(&self) -> SolanaCommitment {
        self.commitment
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Value, SolanaClientError> {
        let request = RpcRequest::new(method, params);
        let response = self
            .client
            .post(self.url.as_str())
            .header("content-type", "application/json")
            .body(
                serde_json::to_string(&request)
                    .map_err(|e| SolanaClientError::Malformed(e.to_string()))?,
            )
            .send()
            .await?
            .json::<RpcResponse>()
            .await?;

        match response {
            RpcResponse::Success(success) => Ok(success.result),
            RpcResponse::Error(error) => Err(SolanaClientError::RpcError(error.error.message)),
        }
    }

    pub async fn get_slot(&self) -> Result<u64, SolanaClientError> {
        let params = Some(vec![json!({ "commitment": self.commitment.as_str() })]);
        let result = self.send_request("getSlot", params).await?;
        result
            .as_u64()
            .ok_or_else(|| SolanaClientError::Malformed("getSlot result".to_string()))
    }

    pub async fn get_latest_blockhash(&self) -> Result<[u8; 32], SolanaClientError> {
        let params = Some(vec![json!({ "commitment": self.commitment.as_str() })]);
        let result = self.send_request("getLatestBlockhash", params).await?;
        let blockhash = result
            .pointer("/value/blockhash")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SolanaClientError::Malformed("getLatestBlockhash missing blockhash".to_string())
            })?;
        let decoded = bs58::decode(blockhash)
            .into_vec()
            .map_err(|e| SolanaClientError::Malformed(e.to_string()))?;
        decoded
            .try_into()
            .map_err(|_| SolanaClientError::Malformed("blockhash is not 32 bytes".to_string()))
    }

    /// Whether an account exists at `pubkey` under the configured
    /// commitment. The bridging pass keys idempotency off this.
    pub async fn account_exists(&self, pubkey: &Pubkey) -> Result<bool, SolanaClientError> {
        let params = Some(vec![
            json!(pubkey.to_base58()),
            json!({ "encoding": "base64", "commitment": self.commitment.as_str() }),
        ]);
        let result = self.send_request("getAccountInfo", params).await?;
        Ok(result.pointer("/value").map(|v| !v.is_null()).unwrap_or(false))
    }

    /// Broadcasts a signed transaction, returning its signature.
    pub async fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<String, SolanaClientError> {
        let encoded = BASE64.encode(transaction.serialize());
        let params = Some(vec![
            json!(encoded),
            json!({
                "encoding": "base64",
                "skipPreflight": false,
                "preflightCommitment": self.commitment.as_str(),
            }),
        ]);
        let result = self.send_request("sendTransaction", params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SolanaClientError::Malformed("sendTransaction result".to_string()))
    }

    /// Polls signature statuses until the configured commitment is reached,
    /// racing the confirmation timeout.
    pub async fn confirm_transaction(&self, signature: &str) -> Result<(), SolanaClientError> {
        let wait = async {
            loop {
                let params = Some(vec![
                    json!([signature]),
                    json!({ "searchTransactionHistory": true }),
                ]);
                let result = self.send_request("getSignatureStatuses", params).await?;
                if let Some(status) = result.pointer("/value/0") {
                    if !status.is_null() {
                        if let Some(err) = status.pointer("/err") {
                            if !err.is_null() {
                                return Err(SolanaClientError::RpcError(format!(
                                    "transaction {signature} failed: {err}"
                                )));
                            }
                        }
                        let confirmation = status
                            .pointer("/confirmationStatus")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let reached = match self.commitment {
                            SolanaCommitment::Processed => true,
                            SolanaCommitment::Confirmed => {
                                confirmation == "confirmed" || confirmation == "finalized"
                            }
                            SolanaCommitment::Finalized => confirmation == "finalized",
                        };
                        if reached {
                            debug!(signature, confirmation, "Solana transaction confirmed");
                            return Ok(());
                        }
                    }
                }
                tokio::time::sleep(SIGNATURE_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(CONFIRMATION_TIMEOUT, wait)
            .await
            .map_err(|_| SolanaClientError::ConfirmationTimeout)?
    }
}
