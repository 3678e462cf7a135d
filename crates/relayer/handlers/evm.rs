use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration as ChronoDuration;
use chrono::Utc;
use ethereum_types::{Address, H256, U256};
use lazy_static::lazy_static;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tbtc_relay_common::types::{
    ChainType, Deposit, DepositId, DepositStatus, FundingTransaction, L1OutputEvent, MainUtxo,
    Redemption, RedemptionEvent, evm_address_to_owner,
};
use tbtc_relay_config::EvmChainConfig;
use tbtc_relay_rpc::calldata::{Value, decode_address, decode_h256, decode_uint, encode_calldata};
use tbtc_relay_rpc::clients::attestation::{
    AttestationClient, AttestationError, VAA_POLL_TIMEOUT, VaaFetchOutcome,
    emitter_address_from_evm,
};
use tbtc_relay_rpc::clients::eth::types::{BlockIdentifier, BlockTag, RpcLog};
use tbtc_relay_rpc::clients::eth::{CONFIRMATION_TIMEOUT, EthClient, Overrides, event_topic};
use tbtc_relay_rpc::signer::{NonceManager, Signer};
use tbtc_relay_storage::{Store, StoreError};

use crate::errors::HandlerError;
use crate::l1::{L1Bridge, L1Client, OnChainDepositState};
use crate::pipeline::{self, FinalizeBehavior, PipelineContext};
use crate::redemption::{
    self, GatewayLogSequenceIndex, RedemptionSubmitContext, RedemptionVaaContext, SequenceIndex,
    emitter_address_from_str,
};
use crate::utils::sleep_random;

lazy_static! {
    static ref DEPOSIT_INITIALIZED_TOPIC: H256 = event_topic(
        "DepositInitialized(bytes,(uint32,bytes8,bytes20,bytes20,bytes4,address),address,address)"
    );
    static ref REDEMPTION_REQUESTED_TOPIC: H256 = event_topic(
        "RedemptionRequested(bytes20,(bytes32,uint32,uint64),bytes,uint64)"
    );
}

const LISTENER_INTERVAL: Duration = Duration::from_secs(15);
const MAX_BLOCK_STEP: u64 = 1_000;
const RECEIVE_TBTC_SIGNATURE: &str = "receiveTbtc(bytes)";

/// Handler for EVM-class destination chains (Arbitrum, Base, …).
///
/// L1 traffic goes through the shared pipeline; the L2 side runs a polling
/// log listener, the timestamp back-fill, the wormhole bridging pass and
/// (when enabled) the redemption pipeline.
pub struct EvmHandler {
    config: EvmChainConfig,
    store: Store,
    l1: Arc<L1Client>,
    l2_client: EthClient,
    l2_signer: Signer,
    l2_nonce: NonceManager,
    l2_depositor: Address,
    l2_gateway: Address,
    l2_redeemer: Option<Address>,
    attestation: Arc<AttestationClient>,
    sequence_index: Arc<dyn SequenceIndex>,
    retry_interval: ChronoDuration,
    deposit_cursor: Mutex<u64>,
    redemption_cursor: Mutex<u64>,
    minting_cursor: Mutex<u64>,
    cancel: CancellationToken,
}

impl EvmHandler {
    pub fn new(
        config: EvmChainConfig,
        store: Store,
        attestation: Arc<AttestationClient>,
        retry_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, HandlerError> {
        let l1_client = EthClient::new(config.common.l1_rpc.as_str())?;
        let l2_client = EthClient::new(config.common.l2_rpc.as_str())?;
        let signer = Signer::new(config.private_key);
        let l2_signer = Signer::new(config.private_key);

        let l1 = Arc::new(L1Client::new(
            l1_client,
            signer,
            config.common.l1_bitcoin_depositor_address,
            config.common.vault_address,
            config.common.l1_confirmations,
        ));

        let l2_depositor = Address::from_str(&config.common.l2_bitcoin_depositor_address)
            .map_err(|_| {
                HandlerError::Custom("L2 depositor address is not an EVM address".to_string())
            })?;
        let l2_gateway = Address::from_str(&config.common.l2_wormhole_gateway_address)
            .map_err(|_| {
                HandlerError::Custom("L2 gateway address is not an EVM address".to_string())
            })?;
        let l2_redeemer = match &config.common.l2_bitcoin_redeemer_address {
            Some(raw) => Some(Address::from_str(raw).map_err(|_| {
                HandlerError::Custom("L2 redeemer address is not an EVM address".to_string())
            })?),
            None => None,
        };

        let sequence_index = Arc::new(GatewayLogSequenceIndex::new(l2_client.clone()));

        Ok(EvmHandler {
            config,
            store,
            l1,
            l2_client,
            l2_signer,
            l2_nonce: NonceManager::new(),
            l2_depositor,
            l2_gateway,
            l2_redeemer,
            attestation,
            sequence_index,
            retry_interval: ChronoDuration::from_std(retry_interval)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
            deposit_cursor: Mutex::new(0),
            redemption_cursor: Mutex::new(0),
            minting_cursor: Mutex::new(0),
            cancel,
        })
    }

    fn pipeline_ctx(&self) -> PipelineContext<'_> {
        PipelineContext {
            store: &self.store,
            l1: self.l1.as_ref(),
            chain_name: &self.config.common.chain_name,
            retry_interval: self.retry_interval,
        }
    }

    /// Decodes the L2 `DepositInitialized` event payload into the data the
    /// L1 initialize call needs. The funding transaction arrives as raw
    /// Bitcoin bytes and gets split here.
    fn parse_deposit_initialized(&self, log: &RpcLog) -> Result<L1OutputEvent, HandlerError> {
        let data = &log.data;
        let word = |index: usize| -> Result<H256, HandlerError> {
            decode_h256(data, index)
                .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))
        };

        let funding_offset = decode_uint(data, 0)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?;
        if funding_offset > U256::from(u32::MAX) {
            return Err(HandlerError::FailedToDeserializeEvent(
                "funding tx offset out of range".to_string(),
            ));
        }
        let funding_offset = funding_offset.as_usize();
        let funding_tail = data.get(funding_offset..).ok_or_else(|| {
            HandlerError::FailedToDeserializeEvent("funding tx offset out of bounds".to_string())
        })?;
        let funding_len = decode_uint(funding_tail, 0)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?;
        if funding_len > U256::from(u32::MAX) {
            return Err(HandlerError::FailedToDeserializeEvent(
                "funding tx length out of range".to_string(),
            ));
        }
        let funding_len = funding_len.as_usize();
        let funding_raw = data
            .get(funding_offset + 32..funding_offset + 32 + funding_len)
            .ok_or_else(|| {
                HandlerError::FailedToDeserializeEvent("funding tx out of bounds".to_string())
            })?;
        let funding_tx = FundingTransaction::parse(funding_raw)?;

        let funding_output_index = decode_uint(data, 1)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?
            .low_u32();
        let mut blinding_factor = [0u8; 8];
        blinding_factor.copy_from_slice(&word(2)?.as_bytes()[..8]);
        let mut wallet_pub_key_hash = [0u8; 20];
        wallet_pub_key_hash.copy_from_slice(&word(3)?.as_bytes()[..20]);
        let mut refund_pub_key_hash = [0u8; 20];
        refund_pub_key_hash.copy_from_slice(&word(4)?.as_bytes()[..20]);
        let mut refund_locktime = [0u8; 4];
        refund_locktime.copy_from_slice(&word(5)?.as_bytes()[..4]);
        let vault = decode_address(data, 6)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?;

        let l2_deposit_owner = decode_address(data, 7)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?;
        let l2_sender = decode_address(data, 8)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?;

        Ok(L1OutputEvent {
            funding_tx,
            reveal: tbtc_relay_common::types::DepositReveal {
                funding_output_index,
                blinding_factor,
                wallet_pub_key_hash,
                refund_pub_key_hash,
                refund_locktime,
                vault,
            },
            l2_deposit_owner: evm_address_to_owner(l2_deposit_owner),
            l2_sender: evm_address_to_owner(l2_sender),
        })
    }

    /// Idempotent ingest: a known deposit id is ignored, an unknown one is
    /// created Queued and pushed through the initialize fast path.
    async fn handle_deposit_event(&self, log: &RpcLog) -> Result<(), HandlerError> {
        let event = self.parse_deposit_initialized(log)?;

        if event.reveal.vault != self.config.common.vault_address {
            error!(
                chain = %self.config.common.chain_name,
                vault = %event.reveal.vault,
                "DepositInitialized carries a foreign vault, ignoring"
            );
            return Ok(());
        }

        let deposit = Deposit::new(&self.config.common.chain_name, event);
        let deposit_id = deposit.id;
        match self.store.create_deposit(deposit.clone()).await {
            Ok(()) => {
                info!(
                    chain = %self.config.common.chain_name,
                    deposit = %deposit_id,
                    l2_tx = %log.transaction_hash,
                    "new deposit queued from L2 event"
                );
                pipeline::initialize_deposit_now(&self.pipeline_ctx(), deposit).await
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!(deposit = %deposit_id, "deposit already known, ignoring event");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn parse_redemption_requested(
        &self,
        log: &RpcLog,
    ) -> Result<RedemptionEvent, HandlerError> {
        let data = &log.data;
        let bad = |what: &str| HandlerError::FailedToDeserializeEvent(what.to_string());

        let mut wallet_pub_key_hash = [0u8; 20];
        wallet_pub_key_hash
            .copy_from_slice(&decode_h256(data, 0).map_err(|_| bad("walletPubKeyHash"))?.as_bytes()[..20]);

        let utxo_tx_hash = decode_h256(data, 1).map_err(|_| bad("mainUtxo.txHash"))?;
        let utxo_output_index = decode_uint(data, 2).map_err(|_| bad("mainUtxo.outputIndex"))?;
        let utxo_value = decode_uint(data, 3).map_err(|_| bad("mainUtxo.value"))?;

        let script_offset = decode_uint(data, 4).map_err(|_| bad("script offset"))?;
        if script_offset > U256::from(u32::MAX) {
            return Err(bad("script offset out of range"));
        }
        let script_offset = script_offset.as_usize();
        let script_tail = data
            .get(script_offset..)
            .ok_or_else(|| bad("script offset out of bounds"))?;
        let script_len = decode_uint(script_tail, 0).map_err(|_| bad("script length"))?;
        if script_len > U256::from(u32::MAX) {
            return Err(bad("script length out of range"));
        }
        let script_len = script_len.as_usize();
        let script = data
            .get(script_offset + 32..script_offset + 32 + script_len)
            .ok_or_else(|| bad("script out of bounds"))?;

        let amount = decode_uint(data, 5).map_err(|_| bad("amount"))?;

        Ok(RedemptionEvent {
            wallet_pub_key_hash,
            main_utxo: MainUtxo {
                tx_hash: utxo_tx_hash,
                output_index: utxo_output_index.low_u32(),
                value: utxo_value.low_u64(),
            },
            redeemer_output_script: Bytes::copy_from_slice(script),
            amount,
        })
    }

    /// Creates a Pending redemption keyed by the event's L2 transaction
    /// hash; duplicates are silently dropped.
    async fn handle_redemption_event(&self, log: &RpcLog) -> Result<(), HandlerError> {
        let event = self.parse_redemption_requested(log)?;
        let redemption =
            Redemption::new(log.transaction_hash, &self.config.common.chain_name, event);
        match self.store.create_redemption(redemption).await {
            Ok(()) => {
                info!(
                    chain = %self.config.common.chain_name,
                    redemption = %log.transaction_hash,
                    "new redemption pending"
                );
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn poll_deposit_logs(&self) -> Result<(), HandlerError> {
        let latest = self.l2_client.get_block_number().await?.as_u64();
        let mut cursor = self.deposit_cursor.lock().await;
        if *cursor == 0 {
            *cursor = latest;
            return Ok(());
        }
        if latest <= *cursor {
            return Ok(());
        }
        let to_block = latest.min(*cursor + MAX_BLOCK_STEP);
        let logs = self
            .l2_client
            .get_logs(
                *cursor + 1,
                to_block,
                self.l2_depositor,
                vec![*DEPOSIT_INITIALIZED_TOPIC],
            )
            .await?;
        for log in &logs {
            if let Err(e) = self.handle_deposit_event(log).await {
                error!(
                    chain = %self.config.common.chain_name,
                    error = %e,
                    "failed to process DepositInitialized event"
                );
            }
        }
        *cursor = to_block;
        Ok(())
    }

    async fn poll_redemption_logs(&self) -> Result<(), HandlerError> {
        let Some(redeemer) = self.l2_redeemer else {
            return Ok(());
        };
        let latest = self.l2_client.get_block_number().await?.as_u64();
        let mut cursor = self.redemption_cursor.lock().await;
        if *cursor == 0 {
            *cursor = latest;
            return Ok(());
        }
        if latest <= *cursor {
            return Ok(());
        }
        let to_block = latest.min(*cursor + MAX_BLOCK_STEP);
        let logs = self
            .l2_client
            .get_logs(
                *cursor + 1,
                to_block,
                redeemer,
                vec![*REDEMPTION_REQUESTED_TOPIC],
            )
            .await?;
        for log in &logs {
            if let Err(e) = self.handle_redemption_event(log).await {
                error!(
                    chain = %self.config.common.chain_name,
                    error = %e,
                    "failed to process RedemptionRequested event"
                );
            }
        }
        *cursor = to_block;
        Ok(())
    }

    /// Watches the vault's `OptimisticMintingFinalized` events on L1 and
    /// finalizes matching Initialized deposits immediately instead of
    /// waiting for the batch cadence.
    async fn poll_minting_events(&self) -> Result<(), HandlerError> {
        let latest = self.l1.eth_client().get_block_number().await?.as_u64();
        let mut cursor = self.minting_cursor.lock().await;
        if *cursor == 0 {
            *cursor = latest;
            return Ok(());
        }
        if latest <= *cursor {
            return Ok(());
        }
        let to_block = latest.min(*cursor + MAX_BLOCK_STEP);
        let finalized = self
            .l1
            .optimistic_minting_finalized(*cursor + 1, to_block)
            .await?;
        for (deposit_key, l1_tx) in &finalized {
            let id = DepositId(H256(deposit_key.to_big_endian()));
            let Some(deposit) = self.store.get_deposit(id).await? else {
                continue;
            };
            if deposit.chain_name != self.config.common.chain_name {
                continue;
            }
            debug!(
                chain = %self.config.common.chain_name,
                deposit = %id,
                mint_tx = %l1_tx,
                "optimistic mint finalized, fast-tracking finalize"
            );
            if let Err(e) = pipeline::finalize_deposit_now(
                &self.pipeline_ctx(),
                FinalizeBehavior::default(),
                deposit,
            )
            .await
            {
                error!(
                    chain = %self.config.common.chain_name,
                    deposit = %id,
                    error = %e,
                    "fast-path finalize failed"
                );
            }
        }
        *cursor = to_block;
        Ok(())
    }

    /// Largest block whose timestamp is still below `target`: binary search
    /// over `[low, high]` block timestamps.
    async fn block_for_timestamp(
        &self,
        target: u64,
        mut low: u64,
        mut high: u64,
    ) -> Result<u64, HandlerError> {
        while low < high {
            let mid = low + (high - low) / 2;
            let block = self
                .l2_client
                .get_block_by_number(BlockIdentifier::Number(mid))
                .await?;
            if block.timestamp < target {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Sends a write to an L2 contract with the handler's own L2 nonce
    /// counter, mirroring the L1 write path.
    async fn send_l2_write(&self, to: Address, calldata: Vec<u8>) -> Result<H256, HandlerError> {
        let calldata = Bytes::from(calldata);
        let from = self.l2_signer.address();

        // Pre-flight; a revert here surfaces before any gas is spent.
        self.l2_client
            .call(
                to,
                calldata.clone(),
                Overrides {
                    from: Some(from),
                    ..Default::default()
                },
            )
            .await?;

        let nonce = self.l2_nonce.next_nonce(&self.l2_client, from).await?;
        let tx = match self
            .l2_client
            .build_eip1559_transaction(
                to,
                from,
                calldata,
                Overrides {
                    from: Some(from),
                    nonce: Some(nonce),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                self.l2_nonce.reset().await;
                return Err(e.into());
            }
        };
        let tx_hash = match self
            .l2_client
            .send_eip1559_transaction(&tx, &self.l2_signer)
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                self.l2_nonce.reset().await;
                return Err(e.into());
            }
        };
        let receipt = self
            .l2_client
            .wait_for_receipt(tx_hash, 1, CONFIRMATION_TIMEOUT)
            .await?;
        if !receipt.succeeded() {
            return Err(HandlerError::Custom(format!(
                "L2 transaction {tx_hash:#x} reverted"
            )));
        }
        Ok(tx_hash)
    }

    async fn bridge_one(&self, mut deposit: Deposit) -> Result<(), HandlerError> {
        let Some(info) = deposit.attestation_info else {
            deposit.record_error("missing attestation info on AwaitingAttestation deposit");
            self.store.update_deposit(deposit).await?;
            return Ok(());
        };

        // Shutdown unwinds without touching the record; any other fetch
        // failure is recorded so the retry pacing applies.
        let fetch = self
            .attestation
            .fetch_vaa(
                self.config.common.network.l1_wormhole_chain_id(),
                emitter_address_from_evm(self.l1.depositor_address()),
                info.transfer_sequence,
                VAA_POLL_TIMEOUT,
                &self.cancel,
            )
            .await;
        let outcome = match fetch {
            Ok(outcome) => outcome,
            Err(AttestationError::Cancelled) => return Ok(()),
            Err(e) => VaaFetchOutcome::Failed(e.to_string()),
        };

        match outcome {
            VaaFetchOutcome::Fetched(vaa) => {
                let calldata = encode_calldata(
                    RECEIVE_TBTC_SIGNATURE,
                    &[Value::Bytes(vaa)],
                )
                .map_err(|e| HandlerError::Custom(e.to_string()))?;
                match self.send_l2_write(self.l2_gateway, calldata).await {
                    Ok(tx_hash) => {
                        deposit.hashes.l2_bridge_tx = Some(format!("{tx_hash:#x}"));
                        deposit.set_status(DepositStatus::Bridged)?;
                        deposit.clear_error();
                        info!(
                            chain = %self.config.common.chain_name,
                            deposit = %deposit.id,
                            %tx_hash,
                            "deposit bridged"
                        );
                    }
                    Err(e) => {
                        deposit.record_error(format!("L2 bridge submission failed: {e}"));
                    }
                }
            }
            VaaFetchOutcome::NotReady => {
                debug!(deposit = %deposit.id, "attestation not ready, retrying later");
                deposit.mark_activity();
            }
            VaaFetchOutcome::Failed(reason) => {
                deposit.record_error(format!("attestation fetch failed: {reason}"));
            }
        }
        self.store.update_deposit(deposit).await?;
        Ok(())
    }
}

#[async_trait]
impl super::ChainHandler for EvmHandler {
    fn chain_name(&self) -> &str {
        &self.config.common.chain_name
    }

    fn chain_type(&self) -> ChainType {
        ChainType::Evm
    }

    async fn initialize(&self) -> Result<(), HandlerError> {
        let l1_balance = self
            .l1
            .eth_client()
            .get_balance(self.l1.signer_address(), BlockIdentifier::Tag(BlockTag::Latest))
            .await?;
        if l1_balance.is_zero() {
            warn!(
                chain = %self.config.common.chain_name,
                signer = %self.l1.signer_address(),
                "L1 relayer account has no balance"
            );
        }
        let latest = self.l2_client.get_block_number().await?;
        info!(
            chain = %self.config.common.chain_name,
            l2_block = %latest,
            "EVM handler initialized"
        );
        Ok(())
    }

    async fn start_listening(&self, cancel: CancellationToken) -> Result<(), HandlerError> {
        if self.config.common.use_endpoint {
            info!(
                chain = %self.config.common.chain_name,
                "endpoint mode, L2 listeners disabled"
            );
            return Ok(());
        }
        info!(chain = %self.config.common.chain_name, "starting L2 log listener");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep_random(LISTENER_INTERVAL) => {}
            }
            if let Err(e) = self.poll_deposit_logs().await {
                warn!(chain = %self.config.common.chain_name, error = %e, "deposit log poll failed");
            }
            if let Err(e) = self.poll_minting_events().await {
                warn!(chain = %self.config.common.chain_name, error = %e, "minting event poll failed");
            }
            if self.config.common.enable_l2_redemption {
                if let Err(e) = self.poll_redemption_logs().await {
                    warn!(chain = %self.config.common.chain_name, error = %e, "redemption log poll failed");
                }
            }
        }
    }

    async fn process_initialize_deposits(&self) -> Result<usize, HandlerError> {
        pipeline::process_initialize_deposits(&self.pipeline_ctx()).await
    }

    async fn process_finalize_deposits(&self) -> Result<usize, HandlerError> {
        pipeline::process_finalize_deposits(&self.pipeline_ctx(), FinalizeBehavior::default())
            .await
    }

    async fn process_bridge_deposits(&self) -> Result<usize, HandlerError> {
        let awaiting = self
            .store
            .get_deposits_by_status(
                DepositStatus::AwaitingAttestation,
                &self.config.common.chain_name,
            )
            .await?;
        let mut processed = 0;
        for deposit in awaiting {
            if !deposit.is_due(self.retry_interval) {
                continue;
            }
            processed += 1;
            if let Err(e) = self.bridge_one(deposit).await {
                error!(chain = %self.config.common.chain_name, error = %e, "bridge pass entry failed");
            }
        }
        Ok(processed)
    }

    async fn latest_block(&self) -> Result<u64, HandlerError> {
        Ok(self.l2_client.get_block_number().await?.as_u64())
    }

    fn supports_past_deposit_check(&self) -> bool {
        true
    }

    async fn check_for_past_deposits(
        &self,
        past_minutes: u64,
        latest_block: u64,
    ) -> Result<(), HandlerError> {
        let target = (Utc::now().timestamp() as u64).saturating_sub(past_minutes * 60);
        let from_block = self
            .block_for_timestamp(target, self.config.common.l2_start_block, latest_block)
            .await?;

        debug!(
            chain = %self.config.common.chain_name,
            from_block,
            latest_block,
            "scanning for missed deposits"
        );

        let mut chunk_start = from_block;
        while chunk_start <= latest_block {
            let chunk_end = latest_block.min(chunk_start + MAX_BLOCK_STEP - 1);
            let logs = self
                .l2_client
                .get_logs(
                    chunk_start,
                    chunk_end,
                    self.l2_depositor,
                    vec![*DEPOSIT_INITIALIZED_TOPIC],
                )
                .await?;
            for log in &logs {
                if let Err(e) = self.handle_deposit_event(log).await {
                    error!(
                        chain = %self.config.common.chain_name,
                        error = %e,
                        "failed to replay past deposit event"
                    );
                }
            }
            chunk_start = chunk_end + 1;
        }
        Ok(())
    }

    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<OnChainDepositState, HandlerError> {
        Ok(self.l1.deposit_state(id.as_u256()).await?)
    }

    fn redemption_enabled(&self) -> bool {
        self.config.common.enable_l2_redemption
    }

    async fn process_pending_redemptions(&self) -> Result<usize, HandlerError> {
        let emitter_address =
            emitter_address_from_str(&self.config.common.l2_wormhole_gateway_address)
                .ok_or_else(|| {
                    HandlerError::Custom("gateway address is not a valid emitter".to_string())
                })?;
        let ctx = RedemptionVaaContext {
            store: &self.store,
            chain_name: &self.config.common.chain_name,
            attestation: self.attestation.as_ref(),
            emitter_chain: self.config.common.l2_wormhole_chain_id,
            emitter_address,
            sequence_index: self.sequence_index.as_ref(),
            retry_interval: self.retry_interval,
            cancel: &self.cancel,
        };
        redemption::process_pending_redemptions(&ctx)
            .await
            .map_err(|e| HandlerError::Custom(e.to_string()))
    }

    async fn process_vaa_fetched_redemptions(&self) -> Result<usize, HandlerError> {
        let ctx = RedemptionSubmitContext {
            store: &self.store,
            chain_name: &self.config.common.chain_name,
            l1: self.l1.as_ref(),
            redeemer: self.l1.signer_address(),
            retry_interval: self.retry_interval,
        };
        redemption::process_vaa_fetched_redemptions(&ctx)
            .await
            .map_err(|e| HandlerError::Custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use secp256k1::SecretKey;
    use tbtc_relay_common::types::Network;
    use tbtc_relay_config::CommonChainConfig;
    use url::Url;

    fn test_handler() -> EvmHandler {
        let common = CommonChainConfig {
            chain_name: "BaseSepolia".to_string(),
            network: Network::Testnet,
            l1_rpc: Url::parse("http://127.0.0.1:1").unwrap(),
            l2_rpc: Url::parse("http://127.0.0.1:2").unwrap(),
            l2_ws_rpc: None,
            l1_bitcoin_depositor_address: Address::from_low_u64_be(1),
            l2_bitcoin_depositor_address:
                "0x49D1b98B0c8d3cEe5Af0fC8EE1c2F1c1C8CE1c11".to_string(),
            l2_bitcoin_redeemer_address: None,
            vault_address: Address::from_low_u64_be(0x777),
            l2_wormhole_gateway_address:
                "0x12D1b98B0c8d3cEe5Af0fC8EE1c2F1c1C8CE1c33".to_string(),
            l2_wormhole_chain_id: 30,
            l1_confirmations: 1,
            l2_start_block: 0,
            use_endpoint: false,
            enable_l2_redemption: true,
            supports_reveal_deposit_api: false,
        };
        let config = EvmChainConfig {
            common,
            private_key: SecretKey::from_str(
                "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            )
            .unwrap(),
        };
        let attestation = Arc::new(
            AttestationClient::new(Url::parse("https://api.wormholescan.io/").unwrap()).unwrap(),
        );
        EvmHandler::new(
            config,
            Store::default(),
            attestation,
            Duration::from_secs(300),
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn word_from(bytes: &[u8]) -> [u8; 32] {
        // left-aligned fixed bytes
        let mut out = [0u8; 32];
        out[..bytes.len()].copy_from_slice(bytes);
        out
    }

    fn uint_word(value: u64) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&value.to_be_bytes());
        out
    }

    fn address_word(address: Address) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(address.as_bytes());
        out
    }

    fn raw_funding_tx() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&hex!("02000000"));
        raw.extend_from_slice(&hex!(
            "01c0ffee0000000000000000000000000000000000000000000000000000000000000000ffffffff00ffffffff"
        ));
        raw.extend_from_slice(&hex!(
            "0150c3000000000000160014deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
        ));
        raw.extend_from_slice(&hex!("00000000"));
        raw
    }

    fn deposit_initialized_log(vault: Address, owner: Address) -> RpcLog {
        let funding = raw_funding_tx();
        let mut data = Vec::new();
        data.extend_from_slice(&uint_word(9 * 32)); // offset to fundingTx bytes
        data.extend_from_slice(&uint_word(0)); // reveal.fundingOutputIndex
        data.extend_from_slice(&word_from(&hex!("f9f0c90d00039523")));
        data.extend_from_slice(&word_from(&hex!(
            "8db50eb52063ea9d98b3eac91489a90f738986f6"
        )));
        data.extend_from_slice(&word_from(&hex!(
            "28e081f285138ccbe389c1eb8985716230129f89"
        )));
        data.extend_from_slice(&word_from(&hex!("60bcea61")));
        data.extend_from_slice(&address_word(vault));
        data.extend_from_slice(&address_word(owner));
        data.extend_from_slice(&address_word(Address::from_low_u64_be(0x5e)));
        // tail: length-prefixed, right-padded funding tx
        data.extend_from_slice(&uint_word(funding.len() as u64));
        data.extend_from_slice(&funding);
        let pad = (32 - funding.len() % 32) % 32;
        data.extend_from_slice(&vec![0u8; pad]);

        RpcLog {
            address: Address::from_low_u64_be(0x49),
            topics: vec![*DEPOSIT_INITIALIZED_TOPIC],
            data: Bytes::from(data),
            block_number: 1,
            transaction_hash: H256::from_low_u64_be(0xABCD),
            log_index: Some(0),
        }
    }

    #[test]
    fn deposit_initialized_event_decodes() {
        let handler = test_handler();
        let owner = Address::from_slice(&hex!("abcdabcdabcdabcdabcdabcdabcdabcdabcdabcd"));
        let log = deposit_initialized_log(Address::from_low_u64_be(0x777), owner);

        let event = handler.parse_deposit_initialized(&log).unwrap();
        assert_eq!(event.funding_tx.version, hex!("02000000"));
        assert_eq!(event.reveal.funding_output_index, 0);
        assert_eq!(event.reveal.blinding_factor, hex!("f9f0c90d00039523"));
        assert_eq!(event.reveal.vault, Address::from_low_u64_be(0x777));
        assert_eq!(event.l2_deposit_owner, evm_address_to_owner(owner));

        // same payload, same deposit id
        let a = Deposit::new("BaseSepolia", event.clone());
        let b = Deposit::new("BaseSepolia", event);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn truncated_event_data_is_rejected() {
        let handler = test_handler();
        let log = deposit_initialized_log(
            Address::from_low_u64_be(0x777),
            Address::from_low_u64_be(0xAB),
        );
        let mut short = log.clone();
        short.data = Bytes::copy_from_slice(&log.data[..64]);
        assert!(handler.parse_deposit_initialized(&short).is_err());
    }

    #[test]
    fn redemption_requested_event_decodes() {
        let handler = test_handler();
        let script = hex!("160014deadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
        let mut data = Vec::new();
        data.extend_from_slice(&word_from(&hex!(
            "8db50eb52063ea9d98b3eac91489a90f738986f6"
        ))); // walletPubKeyHash
        data.extend_from_slice(&[0x42; 32]); // mainUtxo.txHash
        data.extend_from_slice(&uint_word(1)); // mainUtxo.outputIndex
        data.extend_from_slice(&uint_word(730_000)); // mainUtxo.value
        data.extend_from_slice(&uint_word(6 * 32)); // offset to script
        data.extend_from_slice(&uint_word(1_000_000)); // amount
        data.extend_from_slice(&uint_word(script.len() as u64));
        data.extend_from_slice(&script);
        data.extend_from_slice(&vec![0u8; (32 - script.len() % 32) % 32]);

        let log = RpcLog {
            address: Address::from_low_u64_be(0x50),
            topics: vec![*REDEMPTION_REQUESTED_TOPIC],
            data: Bytes::from(data),
            block_number: 2,
            transaction_hash: H256::from_low_u64_be(0xFEED),
            log_index: Some(0),
        };

        let event = handler.parse_redemption_requested(&log).unwrap();
        assert_eq!(
            event.wallet_pub_key_hash,
            hex!("8db50eb52063ea9d98b3eac91489a90f738986f6")
        );
        assert_eq!(event.main_utxo.output_index, 1);
        assert_eq!(event.main_utxo.value, 730_000);
        assert_eq!(event.redeemer_output_script.as_ref(), script);
        assert_eq!(event.amount, U256::from(1_000_000u64));
    }
}
