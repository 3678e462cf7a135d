use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use ethereum_types::{H256, U256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tbtc_relay_common::types::{ChainType, DepositId, DepositStatus};
use tbtc_relay_config::StarknetChainConfig;
use tbtc_relay_rpc::clients::eth::EthClient;
use tbtc_relay_rpc::signer::Signer;
use tbtc_relay_storage::Store;

use crate::errors::HandlerError;
use crate::l1::{L1Bridge, L1Client, OnChainDepositState, StarknetBridgeEvent};
use crate::pipeline::{self, FinalizeBehavior, PipelineContext};
use crate::utils::sleep_random;

const LISTENER_INTERVAL: Duration = Duration::from_secs(30);
/// Past-scan chunk width; the StarkGate event range is walked in these
/// steps.
const SCAN_BLOCK_CHUNK: u64 = 500;

/// Handler for the Starknet destination chain.
///
/// The L2 side is driven entirely from L1: the StarkGate depositor emits
/// `TBTCBridgedToStarkNet` once the L2 minting message is posted, so this
/// handler watches L1 and never signs Starknet transactions. Finalization
/// attaches the quoted fee (or the configured fallback) as msg.value.
pub struct StarknetHandler {
    config: StarknetChainConfig,
    store: Store,
    l1: Arc<L1Client>,
    retry_interval: ChronoDuration,
    l1_cursor: Mutex<u64>,
}

impl StarknetHandler {
    pub fn new(
        config: StarknetChainConfig,
        store: Store,
        retry_interval: Duration,
    ) -> Result<Self, HandlerError> {
        let l1_client = EthClient::new(config.common.l1_rpc.as_str())?;
        let signer = Signer::new(config.l1_private_key);
        let l1 = Arc::new(L1Client::new(
            l1_client,
            signer,
            config.common.l1_bitcoin_depositor_address,
            config.common.vault_address,
            config.common.l1_confirmations,
        ));

        Ok(StarknetHandler {
            config,
            store,
            l1,
            retry_interval: ChronoDuration::from_std(retry_interval)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
            l1_cursor: Mutex::new(0),
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

    fn finalize_behavior(&self) -> FinalizeBehavior {
        FinalizeBehavior {
            // Bridged state comes from the TBTCBridgedToStarkNet event, not
            // from an attestation fetch.
            track_attestation: false,
            min_fee_wei: U256::from(self.config.l1_fee_amount_wei),
        }
    }

    /// Marks the matching record Bridged. A key owned by another chain is
    /// an invariant violation: logged, never mutated.
    async fn handle_bridge_event(&self, event: &StarknetBridgeEvent) -> Result<(), HandlerError> {
        let key = H256(event.deposit_key.to_big_endian());
        let Some(mut deposit) = self.store.get_deposit(DepositId(key)).await? else {
            debug!(deposit_key = %key, "TBTCBridgedToStarkNet for unknown deposit, ignoring");
            return Ok(());
        };

        if deposit.chain_name != self.config.common.chain_name {
            error!(
                chain = %self.config.common.chain_name,
                deposit = %deposit.id,
                owner = %deposit.chain_name,
                "TBTCBridgedToStarkNet for a deposit owned by another chain"
            );
            return Ok(());
        }
        if deposit.status == DepositStatus::Bridged {
            return Ok(());
        }

        deposit.hashes.l2_bridge_tx = Some(format!("{:#x}", event.l1_tx_hash));
        deposit.set_status(DepositStatus::Bridged)?;
        deposit.clear_error();
        info!(
            chain = %self.config.common.chain_name,
            deposit = %deposit.id,
            amount = %event.amount,
            "deposit bridged to Starknet"
        );
        self.store.update_deposit(deposit).await?;
        Ok(())
    }

    /// One chunked scan over `[from_block, to_block]`.
    async fn scan_bridge_events(&self, from_block: u64, to_block: u64) -> Result<(), HandlerError> {
        let mut chunk_start = from_block;
        while chunk_start <= to_block {
            let chunk_end = to_block.min(chunk_start + SCAN_BLOCK_CHUNK - 1);
            let events = self.l1.bridged_to_starknet(chunk_start, chunk_end).await?;
            for event in &events {
                if let Err(e) = self.handle_bridge_event(event).await {
                    error!(
                        chain = %self.config.common.chain_name,
                        error = %e,
                        "failed to process TBTCBridgedToStarkNet event"
                    );
                }
            }
            chunk_start = chunk_end + 1;
        }
        Ok(())
    }

    /// Advances the cursor over new L1 blocks, scanning for bridge events.
    async fn poll_bridge_events(&self) -> Result<(), HandlerError> {
        let latest = self.l1.eth_client().get_block_number().await?.as_u64();
        let mut cursor = self.l1_cursor.lock().await;
        if *cursor == 0 {
            *cursor = latest;
            return Ok(());
        }
        if latest <= *cursor {
            return Ok(());
        }
        let to_block = latest.min(*cursor + SCAN_BLOCK_CHUNK);
        self.scan_bridge_events(*cursor + 1, to_block).await?;
        *cursor = to_block;
        Ok(())
    }
}

#[async_trait]
impl super::ChainHandler for StarknetHandler {
    fn chain_name(&self) -> &str {
        &self.config.common.chain_name
    }

    fn chain_type(&self) -> ChainType {
        ChainType::Starknet
    }

    async fn initialize(&self) -> Result<(), HandlerError> {
        let latest = self.l1.eth_client().get_block_number().await?.as_u64();
        // Catch up on mints posted while the relayer was down.
        self.scan_bridge_events(self.config.common.l2_start_block, latest)
            .await?;
        *self.l1_cursor.lock().await = latest;
        info!(
            chain = %self.config.common.chain_name,
            l1_block = latest,
            "Starknet handler initialized"
        );
        Ok(())
    }

    async fn start_listening(&self, cancel: CancellationToken) -> Result<(), HandlerError> {
        info!(
            chain = %self.config.common.chain_name,
            "starting L1 StarkGate event listener"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep_random(LISTENER_INTERVAL) => {}
            }
            if let Err(e) = self.poll_bridge_events().await {
                warn!(
                    chain = %self.config.common.chain_name,
                    error = %e,
                    "StarkGate event poll failed"
                );
            }
        }
    }

    async fn process_initialize_deposits(&self) -> Result<usize, HandlerError> {
        pipeline::process_initialize_deposits(&self.pipeline_ctx()).await
    }

    async fn process_finalize_deposits(&self) -> Result<usize, HandlerError> {
        pipeline::process_finalize_deposits(&self.pipeline_ctx(), self.finalize_behavior()).await
    }

    async fn process_bridge_deposits(&self) -> Result<usize, HandlerError> {
        // Bridging progress arrives through L1 events; one poll round keeps
        // endpoint-mode deployments advancing without the listener.
        self.poll_bridge_events().await?;
        Ok(0)
    }

    async fn latest_block(&self) -> Result<u64, HandlerError> {
        Ok(self.l1.eth_client().get_block_number().await?.as_u64())
    }

    fn supports_past_deposit_check(&self) -> bool {
        true
    }

    async fn check_for_past_deposits(
        &self,
        past_minutes: u64,
        latest_block: u64,
    ) -> Result<(), HandlerError> {
        // L1 blocks arrive roughly every 12 seconds.
        let blocks = past_minutes * 60 / 12;
        let from_block = latest_block
            .saturating_sub(blocks)
            .max(self.config.common.l2_start_block);
        self.scan_bridge_events(from_block, latest_block).await
    }

    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<OnChainDepositState, HandlerError> {
        Ok(self.l1.deposit_state(id.as_u256()).await?)
    }
}
