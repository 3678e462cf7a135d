use std::time::Duration;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::rpc_types::{RpcErrorMetadata, RpcRequest, RpcResponse};
use crate::signer::Signer;

use errors::EthClientError;
use types::{BlockIdentifier, BlockTag, EIP1559Transaction, RpcBlock, RpcLog, RpcReceipt};

pub mod errors;
pub mod types;

/// Deadline applied to every single RPC read.
pub const RPC_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Wall-clock bound on one confirmation wait.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// keccak topic for a canonical event signature, e.g.
/// `Transfer(address,address,uint256)`.
pub fn event_topic(signature: &str) -> H256 {
    keccak(signature.as_bytes())
}

fn malformed(method: &str, detail: impl std::fmt::Display) -> EthClientError {
    EthClientError::MalformedResponse {
        method: method.to_string(),
        detail: detail.to_string(),
    }
}

fn rpc_error(method: &str, metadata: RpcErrorMetadata) -> EthClientError {
    EthClientError::RpcError {
        method: method.to_string(),
        message: metadata.message,
        data: metadata.data.and_then(|d| d.as_str().map(str::to_string)),
    }
}

/// Parses a JSON-RPC quantity (`"0x…"` hex string) as a u64.
fn quantity_u64(method: &str, value: &Value) -> Result<u64, EthClientError> {
    let raw = value
        .as_str()
        .ok_or_else(|| malformed(method, "expected a hex quantity"))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| malformed(method, format!("bad hex quantity: {e}")))
}

/// Parses a JSON-RPC quantity as a U256.
fn quantity_u256(method: &str, value: &Value) -> Result<U256, EthClientError> {
    let raw = value
        .as_str()
        .ok_or_else(|| malformed(method, "expected a hex quantity"))?;
    U256::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| malformed(method, format!("bad hex quantity: {e}")))
}

/// Parses unformatted JSON-RPC data (`"0x…"` hex string) into bytes.
fn hex_data(method: &str, value: &Value) -> Result<Bytes, EthClientError> {
    let raw = value
        .as_str()
        .ok_or_else(|| malformed(method, "expected hex data"))?;
    hex::decode(raw.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| malformed(method, format!("bad hex data: {e}")))
}

/// Deserializes a structured JSON-RPC result.
fn structured<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, EthClientError> {
    serde_json::from_value(value).map_err(|e| malformed(method, e))
}

/// Ethereum-class JSON-RPC client over one or more endpoints. Reads carry a
/// 30 s deadline; every method funnels through one shared dispatcher.
#[derive(Debug, Clone)]
pub struct EthClient {
    client: Client,
    pub urls: Vec<Url>,
}

/// Optional parameters for transaction building and `eth_call`.
#[derive(Default, Clone, Debug)]
pub struct Overrides {
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u64>,
    pub max_priority_fee_per_gas: Option<u64>,
    pub block: Option<BlockIdentifier>,
}

impl EthClient {
    pub fn new(url: &str) -> Result<EthClient, EthClientError> {
        Self::new_with_multiple_urls(vec![url.to_string()])
    }

    pub fn new_with_multiple_urls(urls: Vec<String>) -> Result<EthClient, EthClientError> {
        let urls = urls
            .iter()
            .map(|url| {
                Url::parse(url)
                    .map_err(|_| EthClientError::ParseUrlError("Failed to parse urls".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let client = Client::builder()
            .timeout(RPC_READ_TIMEOUT)
            .build()
            .map_err(EthClientError::ReqwestError)?;

        Ok(Self { client, urls })
    }

    async fn post(&self, url: &Url, request: &RpcRequest) -> Result<RpcResponse, EthClientError> {
        self.client
            .post(url.as_str())
            .header("content-type", "application/json")
            .body(serde_json::to_string(request).map_err(|e| {
                EthClientError::FailedToSerializeRequestBody(format!("{e}: {request:?}"))
            })?)
            .send()
            .await?
            .json::<RpcResponse>()
            .await
            .map_err(EthClientError::from)
    }

    /// Walks the endpoints in order and returns the first successful
    /// result. An endpoint that answers with a JSON-RPC error object gets
    /// skipped like an unreachable one, since fallback endpoints routinely
    /// disagree on which methods they implement; the primary endpoint's
    /// error is what the caller sees if nothing succeeds.
    async fn request(
        &self,
        method: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Value, EthClientError> {
        let request = RpcRequest::new(method, params);
        let mut first_failure: Option<EthClientError> = None;

        for url in &self.urls {
            match self.post(url, &request).await {
                Ok(RpcResponse::Success(reply)) => return Ok(reply.result),
                Ok(RpcResponse::Error(reply)) => {
                    debug!(endpoint = %url, method, error = %reply.error.message, "endpoint rejected request");
                    first_failure.get_or_insert(rpc_error(method, reply.error));
                }
                Err(e) => {
                    warn!(endpoint = %url, method, error = %e, "endpoint unreachable");
                    first_failure.get_or_insert(e);
                }
            }
        }

        Err(first_failure.unwrap_or(EthClientError::FailedAllRPC))
    }

    /// Submission variant: the payload goes to every endpoint and the first
    /// acceptance wins. The remaining nodes seeing a duplicate raw
    /// transaction is harmless.
    async fn broadcast(
        &self,
        method: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Value, EthClientError> {
        let request = RpcRequest::new(method, params);
        let mut accepted: Option<Value> = None;
        let mut first_failure: Option<EthClientError> = None;

        for url in &self.urls {
            match self.post(url, &request).await {
                Ok(RpcResponse::Success(reply)) => {
                    if accepted.is_none() {
                        accepted = Some(reply.result);
                    }
                }
                Ok(RpcResponse::Error(reply)) => {
                    debug!(endpoint = %url, method, error = %reply.error.message, "endpoint rejected submission");
                    first_failure.get_or_insert(rpc_error(method, reply.error));
                }
                Err(e) => {
                    warn!(endpoint = %url, method, error = %e, "endpoint unreachable");
                    first_failure.get_or_insert(e);
                }
            }
        }

        match accepted {
            Some(result) => Ok(result),
            None => Err(first_failure.unwrap_or(EthClientError::FailedAllRPC)),
        }
    }

    pub async fn get_block_number(&self) -> Result<U256, EthClientError> {
        let result = self.request("eth_blockNumber", None).await?;
        quantity_u256("eth_blockNumber", &result)
    }

    pub async fn get_block_by_number(
        &self,
        block: BlockIdentifier,
    ) -> Result<RpcBlock, EthClientError> {
        let params = Some(vec![block.into(), json!(false)]);
        let result = self.request("eth_getBlockByNumber", params).await?;
        structured("eth_getBlockByNumber", result)
    }

    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topics: Vec<H256>,
    ) -> Result<Vec<RpcLog>, EthClientError> {
        let filter = json!({
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
            "address": format!("{address:#x}"),
            "topics": topics.iter().map(|topic| format!("{topic:#x}")).collect::<Vec<_>>(),
        });
        let result = self.request("eth_getLogs", Some(vec![filter])).await?;
        structured("eth_getLogs", result)
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<RpcReceipt>, EthClientError> {
        let params = Some(vec![json!(format!("{tx_hash:#x}"))]);
        let result = self.request("eth_getTransactionReceipt", params).await?;
        structured("eth_getTransactionReceipt", result)
    }

    pub async fn get_nonce(
        &self,
        address: Address,
        block: BlockIdentifier,
    ) -> Result<u64, EthClientError> {
        let params = Some(vec![json!(format!("{address:#x}")), block.into()]);
        let result = self.request("eth_getTransactionCount", params).await?;
        quantity_u64("eth_getTransactionCount", &result)
    }

    pub async fn get_gas_price(&self) -> Result<U256, EthClientError> {
        let result = self.request("eth_gasPrice", None).await?;
        quantity_u256("eth_gasPrice", &result)
    }

    pub async fn get_gas_price_with_extra(
        &self,
        bump_percent: u64,
    ) -> Result<U256, EthClientError> {
        let gas_price = self.get_gas_price().await?;

        Ok((gas_price * (100 + bump_percent)) / 100)
    }

    pub async fn get_balance(
        &self,
        address: Address,
        block: BlockIdentifier,
    ) -> Result<U256, EthClientError> {
        let params = Some(vec![json!(format!("{address:#x}")), block.into()]);
        let result = self.request("eth_getBalance", params).await?;
        quantity_u256("eth_getBalance", &result)
    }

    pub async fn get_chain_id(&self) -> Result<U256, EthClientError> {
        let result = self.request("eth_chainId", None).await?;
        quantity_u256("eth_chainId", &result)
    }

    /// `eth_call` against `to`. A revert surfaces as
    /// [`EthClientError::RpcError`] carrying the node's revert data, which
    /// is what makes pre-flight checks readable.
    pub async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        overrides: Overrides,
    ) -> Result<Bytes, EthClientError> {
        let params = Some(vec![
            json!({
                "to": format!("{to:#x}"),
                "input": format!("0x{}", hex::encode(&calldata)),
                "value": format!("{:#x}", overrides.value.unwrap_or_default()),
                "from": format!("{:#x}", overrides.from.unwrap_or_default()),
            }),
            overrides
                .block
                .map(Into::into)
                .unwrap_or(Value::String("latest".to_string())),
        ]);
        let result = self.request("eth_call", params).await?;
        hex_data("eth_call", &result)
    }

    pub async fn estimate_gas(
        &self,
        to: Address,
        from: Address,
        value: U256,
        calldata: &Bytes,
    ) -> Result<u64, EthClientError> {
        let params = Some(vec![
            json!({
                "to": format!("{to:#x}"),
                "input": format!("0x{}", hex::encode(calldata)),
                "from": format!("{from:#x}"),
                "value": format!("{value:#x}"),
            }),
            json!("latest"),
        ]);
        let result = self.request("eth_estimateGas", params).await?;
        quantity_u64("eth_estimateGas", &result)
    }

    pub async fn send_raw_transaction(&self, data: &[u8]) -> Result<H256, EthClientError> {
        let params = Some(vec![json!(format!("0x{}", hex::encode(data)))]);
        let result = self.broadcast("eth_sendRawTransaction", params).await?;
        structured("eth_sendRawTransaction", result)
    }

    /// Builds an EIP-1559 transaction, filling chain id, fees, nonce and a
    /// gas estimate from the network where overrides leave them out.
    pub async fn build_eip1559_transaction(
        &self,
        to: Address,
        from: Address,
        calldata: Bytes,
        overrides: Overrides,
    ) -> Result<EIP1559Transaction, EthClientError> {
        let chain_id = match overrides.chain_id {
            Some(id) => id,
            None => self.get_chain_id().await?.as_u64(),
        };

        let nonce = match overrides.nonce {
            Some(nonce) => nonce,
            None => {
                self.get_nonce(from, BlockIdentifier::Tag(BlockTag::Latest))
                    .await?
            }
        };

        let gas_price: u64 = match overrides.max_fee_per_gas {
            Some(price) => price,
            None => self
                .get_gas_price_with_extra(20)
                .await?
                .try_into()
                .map_err(|_| {
                    EthClientError::Custom("Failed to convert gas_price to a u64".to_owned())
                })?,
        };

        let value = overrides.value.unwrap_or_default();

        let gas_limit = match overrides.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(to, from, value, &calldata).await?,
        };

        Ok(EIP1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: overrides.max_priority_fee_per_gas.unwrap_or(gas_price),
            max_fee_per_gas: gas_price,
            gas_limit,
            to,
            value,
            data: calldata,
        })
    }

    /// Signs and broadcasts the transaction, returning its hash.
    pub async fn send_eip1559_transaction(
        &self,
        tx: &EIP1559Transaction,
        signer: &Signer,
    ) -> Result<H256, EthClientError> {
        let raw = signer
            .sign_eip1559(tx)
            .map_err(|e| EthClientError::FailedToSignPayload(e.to_string()))?;
        self.send_raw_transaction(&raw).await
    }

    /// Polls for the receipt of `tx_hash` until it has `confirmations`
    /// confirmations, racing a wall-clock timeout.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<RpcReceipt, EthClientError> {
        let wait = async {
            loop {
                if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                    let current_block = self.get_block_number().await?.as_u64();
                    if current_block + 1 >= receipt.block_number + confirmations {
                        return Ok(receipt);
                    }
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| EthClientError::TimeoutError)?
    }
}
