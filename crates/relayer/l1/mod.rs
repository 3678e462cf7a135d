use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tracing::{debug, info};

use tbtc_relay_common::types::L1OutputEvent;
use tbtc_relay_rpc::calldata::{self, Value, decode_revert_reason, encode_calldata};
use tbtc_relay_rpc::clients::eth::errors::EthClientError;
use tbtc_relay_rpc::clients::eth::types::RpcReceipt;
use tbtc_relay_rpc::clients::eth::{CONFIRMATION_TIMEOUT, EthClient, Overrides, event_topic};
use tbtc_relay_rpc::signer::{NonceManager, Signer};

use crate::errors::L1Error;

pub mod events;

pub use events::{StarknetBridgeEvent, extract_transfer_sequence};

const INITIALIZE_DEPOSIT_SIGNATURE: &str =
    "initializeDeposit((bytes4,bytes,bytes,bytes4),(uint32,bytes8,bytes20,bytes20,bytes4,address),bytes32)";
const FINALIZE_DEPOSIT_SIGNATURE: &str = "finalizeDeposit(uint256)";
const QUOTE_FINALIZE_DEPOSIT_SIGNATURE: &str = "quoteFinalizeDeposit()";
const DEPOSIT_STATE_SIGNATURE: &str = "deposits(uint256)";
const FINALIZE_L2_REDEMPTION_SIGNATURE: &str =
    "finalizeL2Redemption(uint256,bytes32,bytes,uint64,uint64,uint64,address)";
const REDEMPTION_PARAMETERS_SIGNATURE: &str = "redemptionParameters()";

/// Deposit state as reported by the L1 depositor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnChainDepositState {
    Unknown,
    Queued,
    Initialized,
    Finalized,
}

impl OnChainDepositState {
    pub fn from_u8(value: u8) -> Result<Self, L1Error> {
        match value {
            0 => Ok(OnChainDepositState::Unknown),
            1 => Ok(OnChainDepositState::Queued),
            2 => Ok(OnChainDepositState::Initialized),
            3 => Ok(OnChainDepositState::Finalized),
            other => Err(L1Error::UnknownDepositState(other)),
        }
    }
}

/// Result of a confirmed L1 write.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: H256,
    /// The cross-chain transfer sequence parsed out of the receipt logs,
    /// when the write published one.
    pub transfer_sequence: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RedemptionFinalizeRequest {
    pub deposit_key: U256,
    pub wallet_pub_key_hash: [u8; 20],
    pub redeemer_output_script: Bytes,
    pub amount: U256,
    pub treasury_fee: u64,
    pub tx_max_fee: u64,
    pub redeemer: Address,
}

/// Redemption fee parameters as published by the L1 bridge:
/// `redemptionParameters() → (dustThreshold, treasuryFeeDivisor, txMaxFee, …)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionParameters {
    /// Divisor applied to the redeemed amount for the protocol treasury
    /// cut; zero disables the fee.
    pub treasury_fee_divisor: u64,
    /// Maximum Bitcoin transaction fee deductible from the redemption.
    pub tx_max_fee: u64,
}

impl RedemptionParameters {
    pub fn treasury_fee(&self, amount: U256) -> u64 {
        if self.treasury_fee_divisor == 0 {
            return 0;
        }
        (amount / U256::from(self.treasury_fee_divisor)).low_u64()
    }
}

/// The semantic L1 operations the pipeline depends on. Handlers and the
/// pipeline talk to this seam; tests substitute mocks.
#[async_trait]
pub trait L1Bridge: Send + Sync {
    async fn deposit_state(&self, deposit_key: U256) -> Result<OnChainDepositState, L1Error>;

    async fn quote_finalize_deposit(&self) -> Result<U256, L1Error>;

    async fn initialize_deposit(&self, event: &L1OutputEvent) -> Result<TxOutcome, L1Error>;

    /// `value` is the quoted finalization fee to attach as msg.value.
    async fn finalize_deposit(&self, deposit_key: U256, value: U256) -> Result<TxOutcome, L1Error>;

    /// Current redemption fee parameters; the submit pass derives the
    /// treasury and Bitcoin-fee arguments from these.
    async fn redemption_parameters(&self) -> Result<RedemptionParameters, L1Error>;

    async fn finalize_l2_redemption(
        &self,
        request: RedemptionFinalizeRequest,
    ) -> Result<TxOutcome, L1Error>;
}

/// Concrete L1 access for one chain: one depositor contract, one signer,
/// one managed nonce counter.
#[derive(Debug)]
pub struct L1Client {
    eth_client: EthClient,
    signer: Signer,
    nonce: NonceManager,
    depositor_address: Address,
    vault_address: Address,
    confirmations: u64,
}

impl L1Client {
    pub fn new(
        eth_client: EthClient,
        signer: Signer,
        depositor_address: Address,
        vault_address: Address,
        confirmations: u64,
    ) -> Self {
        L1Client {
            eth_client,
            signer,
            nonce: NonceManager::new(),
            depositor_address,
            vault_address,
            confirmations,
        }
    }

    pub fn eth_client(&self) -> &EthClient {
        &self.eth_client
    }

    pub fn depositor_address(&self) -> Address {
        self.depositor_address
    }

    pub fn vault_address(&self) -> Address {
        self.vault_address
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    fn revert_reason(message: String, data: Option<String>) -> String {
        data.and_then(|raw| hex::decode(raw.trim_start_matches("0x")).ok())
            .and_then(|raw| decode_revert_reason(&raw))
            .unwrap_or(message)
    }

    fn map_send_error(error: EthClientError) -> L1Error {
        let text = error.to_string();
        if text.contains("insufficient funds") {
            return L1Error::InsufficientFunds(text);
        }
        L1Error::EthClientError(error)
    }

    /// Pre-flights the call, then signs and sends it with the next managed
    /// nonce and waits for confirmations. The transaction is never sent if
    /// the static call reverts.
    async fn send_write(
        &self,
        calldata: Vec<u8>,
        value: U256,
        confirmations: u64,
        gas_bump_percent: Option<u64>,
    ) -> Result<RpcReceipt, L1Error> {
        let calldata = Bytes::from(calldata);
        let from = self.signer.address();

        let preflight = self
            .eth_client
            .call(
                self.depositor_address,
                calldata.clone(),
                Overrides {
                    from: Some(from),
                    value: Some(value),
                    ..Default::default()
                },
            )
            .await;
        if let Err(error) = preflight {
            return match error {
                EthClientError::RpcError { message, data, .. } => Err(L1Error::PreflightRevert {
                    reason: Self::revert_reason(message, data),
                }),
                other => Err(Self::map_send_error(other)),
            };
        }

        let gas_limit = match gas_bump_percent {
            Some(bump) => {
                let estimate = self
                    .eth_client
                    .estimate_gas(self.depositor_address, from, value, &calldata)
                    .await
                    .map_err(Self::map_send_error)?;
                Some(estimate * (100 + bump) / 100)
            }
            None => None,
        };

        let nonce = self
            .nonce
            .next_nonce(&self.eth_client, from)
            .await
            .map_err(Self::map_send_error)?;

        let tx = match self
            .eth_client
            .build_eip1559_transaction(
                self.depositor_address,
                from,
                calldata,
                Overrides {
                    from: Some(from),
                    value: Some(value),
                    nonce: Some(nonce),
                    gas_limit,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(tx) => tx,
            Err(error) => {
                self.nonce.reset().await;
                return Err(Self::map_send_error(error));
            }
        };

        let tx_hash = match self.eth_client.send_eip1559_transaction(&tx, &self.signer).await {
            Ok(hash) => hash,
            Err(error) => {
                self.nonce.reset().await;
                return Err(Self::map_send_error(error));
            }
        };
        debug!(%tx_hash, nonce, "L1 transaction sent");

        let receipt = self
            .eth_client
            .wait_for_receipt(tx_hash, confirmations, CONFIRMATION_TIMEOUT)
            .await
            .map_err(Self::map_send_error)?;

        if !receipt.succeeded() {
            return Err(L1Error::Reverted { tx_hash });
        }
        Ok(receipt)
    }

    /// `OptimisticMintingFinalized` occurrences on the vault in the block
    /// range, as (depositKey, txHash) pairs.
    pub async fn optimistic_minting_finalized(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(U256, H256)>, L1Error> {
        let topic = event_topic("OptimisticMintingFinalized(address,uint256,address,uint256)");
        let logs = self
            .eth_client
            .get_logs(from_block, to_block, self.vault_address, vec![topic])
            .await?;
        Ok(logs
            .into_iter()
            .filter_map(|log| {
                let key = log.topics.get(2)?;
                Some((U256::from_big_endian(key.as_bytes()), log.transaction_hash))
            })
            .collect())
    }

    /// `TBTCBridgedToStarkNet` occurrences on the depositor in the block
    /// range.
    pub async fn bridged_to_starknet(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<StarknetBridgeEvent>, L1Error> {
        let topic = event_topic("TBTCBridgedToStarkNet(bytes32,uint256,uint256)");
        let logs = self
            .eth_client
            .get_logs(from_block, to_block, self.depositor_address, vec![topic])
            .await?;
        Ok(logs
            .into_iter()
            .filter_map(|log| StarknetBridgeEvent::from_log(&log))
            .collect())
    }
}

#[async_trait]
impl L1Bridge for L1Client {
    async fn deposit_state(&self, deposit_key: U256) -> Result<OnChainDepositState, L1Error> {
        let calldata = encode_calldata(DEPOSIT_STATE_SIGNATURE, &[Value::Uint(deposit_key)])?;
        let raw = self
            .eth_client
            .call(self.depositor_address, calldata.into(), Overrides::default())
            .await?;
        let value = calldata::decode_uint(&raw, 0)
            .map_err(|e| L1Error::Custom(format!("malformed deposits() response: {e}")))?;
        OnChainDepositState::from_u8(value.low_u32() as u8)
    }

    async fn quote_finalize_deposit(&self) -> Result<U256, L1Error> {
        let calldata = encode_calldata(QUOTE_FINALIZE_DEPOSIT_SIGNATURE, &[])?;
        let raw = self
            .eth_client
            .call(self.depositor_address, calldata.into(), Overrides::default())
            .await?;
        calldata::decode_uint(&raw, 0)
            .map_err(|e| L1Error::Custom(format!("malformed quoteFinalizeDeposit() response: {e}")))
    }

    async fn initialize_deposit(&self, event: &L1OutputEvent) -> Result<TxOutcome, L1Error> {
        let funding_tx = Value::Tuple(vec![
            Value::FixedBytes(Bytes::copy_from_slice(&event.funding_tx.version)),
            Value::Bytes(event.funding_tx.input_vector.clone()),
            Value::Bytes(event.funding_tx.output_vector.clone()),
            Value::FixedBytes(Bytes::copy_from_slice(&event.funding_tx.locktime)),
        ]);
        let reveal = Value::Tuple(vec![
            Value::Uint(U256::from(event.reveal.funding_output_index)),
            Value::FixedBytes(Bytes::copy_from_slice(&event.reveal.blinding_factor)),
            Value::FixedBytes(Bytes::copy_from_slice(&event.reveal.wallet_pub_key_hash)),
            Value::FixedBytes(Bytes::copy_from_slice(&event.reveal.refund_pub_key_hash)),
            Value::FixedBytes(Bytes::copy_from_slice(&event.reveal.refund_locktime)),
            Value::Address(event.reveal.vault),
        ]);
        let owner = Value::FixedBytes(Bytes::copy_from_slice(event.l2_deposit_owner.as_bytes()));

        let calldata = encode_calldata(INITIALIZE_DEPOSIT_SIGNATURE, &[funding_tx, reveal, owner])?;
        let receipt = self
            .send_write(calldata, U256::zero(), self.confirmations, None)
            .await?;
        info!(tx_hash = %receipt.transaction_hash, "initializeDeposit confirmed");
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            transfer_sequence: None,
        })
    }

    async fn finalize_deposit(&self, deposit_key: U256, value: U256) -> Result<TxOutcome, L1Error> {
        let calldata = encode_calldata(FINALIZE_DEPOSIT_SIGNATURE, &[Value::Uint(deposit_key)])?;
        let receipt = self
            .send_write(calldata, value, self.confirmations, None)
            .await?;
        let transfer_sequence = extract_transfer_sequence(&receipt);
        info!(
            tx_hash = %receipt.transaction_hash,
            ?transfer_sequence,
            "finalizeDeposit confirmed"
        );
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            transfer_sequence,
        })
    }

    async fn redemption_parameters(&self) -> Result<RedemptionParameters, L1Error> {
        let calldata = encode_calldata(REDEMPTION_PARAMETERS_SIGNATURE, &[])?;
        let raw = self
            .eth_client
            .call(self.depositor_address, calldata.into(), Overrides::default())
            .await?;
        // word 0 is the dust threshold, which the relayer has no use for
        let treasury_fee_divisor = calldata::decode_uint(&raw, 1)
            .map_err(|e| L1Error::Custom(format!("malformed redemptionParameters() response: {e}")))?
            .low_u64();
        let tx_max_fee = calldata::decode_uint(&raw, 2)
            .map_err(|e| L1Error::Custom(format!("malformed redemptionParameters() response: {e}")))?
            .low_u64();
        Ok(RedemptionParameters {
            treasury_fee_divisor,
            tx_max_fee,
        })
    }

    async fn finalize_l2_redemption(
        &self,
        request: RedemptionFinalizeRequest,
    ) -> Result<TxOutcome, L1Error> {
        // 20-byte wallet PKH widened to a left-zero-padded bytes32.
        let mut wallet = [0u8; 32];
        wallet[12..].copy_from_slice(&request.wallet_pub_key_hash);

        let calldata = encode_calldata(
            FINALIZE_L2_REDEMPTION_SIGNATURE,
            &[
                Value::Uint(request.deposit_key),
                Value::FixedBytes(Bytes::copy_from_slice(&wallet)),
                Value::Bytes(request.redeemer_output_script.clone()),
                Value::Uint(request.amount),
                Value::Uint(U256::from(request.treasury_fee)),
                Value::Uint(U256::from(request.tx_max_fee)),
                Value::Address(request.redeemer),
            ],
        )?;
        // Redemption submissions run with a 1.2x gas estimate and a single
        // confirmation.
        let receipt = self.send_write(calldata, U256::zero(), 1, Some(20)).await?;
        info!(tx_hash = %receipt.transaction_hash, "finalizeL2Redemption confirmed");
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            transfer_sequence: None,
        })
    }
}
