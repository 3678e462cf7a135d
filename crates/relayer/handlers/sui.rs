use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Duration as ChronoDuration;
use ethereum_types::H256;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tbtc_relay_common::types::{
    ChainType, Deposit, DepositId, DepositReveal, DepositStatus, FundingTransaction, L1OutputEvent,
};
use tbtc_relay_config::SuiChainConfig;
use tbtc_relay_rpc::clients::attestation::{
    AttestationClient, AttestationError, VAA_POLL_TIMEOUT, VaaFetchOutcome,
    emitter_address_from_evm,
};
use tbtc_relay_rpc::clients::eth::EthClient;
use tbtc_relay_rpc::clients::sui::{
    SUI_CLOCK_OBJECT_ID, SuiEvent, SuiEventCursor, SuiKeypair, SuiRpcClient,
};
use tbtc_relay_rpc::signer::Signer;
use tbtc_relay_storage::{Store, StoreError};

use crate::errors::HandlerError;
use crate::l1::{L1Bridge, L1Client, OnChainDepositState};
use crate::pipeline::{self, FinalizeBehavior, PipelineContext};
use crate::utils::sleep_random;

const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_PAGE_SIZE: usize = 50;
const DEPOSITOR_MODULE: &str = "BitcoinDepositor";
const RECEIVE_WORMHOLE_MESSAGES: &str = "receiveWormholeMessages";
const BRIDGE_GAS_BUDGET: u64 = 500_000_000;

/// Move `vector<u8>` values arrive from the events API either as JSON
/// number arrays or as base64/hex strings, depending on node version.
fn bytes_from_move_value(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        Value::String(raw) => {
            if let Some(stripped) = raw.strip_prefix("0x") {
                return hex::decode(stripped).ok();
            }
            BASE64.decode(raw).ok()
        }
        _ => None,
    }
}

/// Handler for the Sui destination chain.
///
/// Sui has no push subscriptions; deposits are ingested by polling the
/// depositor module's events with a durable cursor. Bridging executes a
/// single `receiveWormholeMessages` transaction against the configured
/// shared objects.
pub struct SuiHandler {
    config: SuiChainConfig,
    store: Store,
    l1: Arc<L1Client>,
    sui: SuiRpcClient,
    keypair: SuiKeypair,
    attestation: Arc<AttestationClient>,
    retry_interval: ChronoDuration,
    cursor: Mutex<Option<SuiEventCursor>>,
    cancel: CancellationToken,
}

impl SuiHandler {
    pub fn new(
        config: SuiChainConfig,
        store: Store,
        attestation: Arc<AttestationClient>,
        retry_interval: Duration,
        cancel: CancellationToken,
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

        let sui = SuiRpcClient::new(config.common.l2_rpc.as_str())?;
        let keypair = SuiKeypair::from_encoded(&config.sui_private_key)?;

        Ok(SuiHandler {
            config,
            store,
            l1,
            sui,
            keypair,
            attestation,
            retry_interval: ChronoDuration::from_std(retry_interval)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
            cursor: Mutex::new(None),
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

    /// Decodes a `DepositInitialized` Move event: four byte vectors with
    /// the 56-byte Sui reveal layout. The vault is injected from
    /// configuration since the event carries none.
    fn parse_deposit_event(&self, event: &SuiEvent) -> Result<L1OutputEvent, HandlerError> {
        let field = |name: &str| -> Result<Vec<u8>, HandlerError> {
            event
                .parsed_json
                .get(name)
                .and_then(bytes_from_move_value)
                .ok_or_else(|| {
                    HandlerError::FailedToDeserializeEvent(format!(
                        "event field {name} missing or malformed"
                    ))
                })
        };

        let funding_tx = FundingTransaction::parse(&field("funding_tx")?)?;
        let reveal = DepositReveal::from_sui_bytes(
            &field("deposit_reveal")?,
            self.config.common.vault_address,
        )?;

        let owner_raw = field("deposit_owner")?;
        if owner_raw.len() != 32 {
            return Err(HandlerError::FailedToDeserializeEvent(format!(
                "deposit_owner must be 32 bytes, got {}",
                owner_raw.len()
            )));
        }
        let sender_raw = field("sender")?;
        if sender_raw.len() != 32 {
            return Err(HandlerError::FailedToDeserializeEvent(format!(
                "sender must be 32 bytes, got {}",
                sender_raw.len()
            )));
        }

        Ok(L1OutputEvent {
            funding_tx,
            reveal,
            l2_deposit_owner: H256::from_slice(&owner_raw),
            l2_sender: H256::from_slice(&sender_raw),
        })
    }

    async fn handle_deposit_event(&self, event: &SuiEvent) -> Result<(), HandlerError> {
        let output_event = self.parse_deposit_event(event)?;
        let deposit = Deposit::new(&self.config.common.chain_name, output_event);
        let deposit_id = deposit.id;
        match self.store.create_deposit(deposit.clone()).await {
            Ok(()) => {
                info!(
                    chain = %self.config.common.chain_name,
                    deposit = %deposit_id,
                    tx_digest = %event.id.tx_digest,
                    "new deposit queued from Sui event"
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

    async fn poll_events(&self) -> Result<(), HandlerError> {
        let mut cursor = self.cursor.lock().await;
        let (events, next_cursor, _has_more) = self
            .sui
            .query_module_events(
                &self.config.common.l2_bitcoin_depositor_address,
                DEPOSITOR_MODULE,
                cursor.as_ref(),
                EVENT_PAGE_SIZE,
            )
            .await?;

        for event in &events {
            if let Err(e) = self.handle_deposit_event(event).await {
                error!(
                    chain = %self.config.common.chain_name,
                    error = %e,
                    "failed to process Sui deposit event"
                );
            }
        }
        if next_cursor.is_some() {
            *cursor = next_cursor;
        }
        Ok(())
    }

    /// One `receiveWormholeMessages` call wiring the configured shared
    /// objects, the attestation bytes and the well-known clock.
    async fn submit_bridge_transaction(&self, vaa: &[u8]) -> Result<String, HandlerError> {
        let shared = &self.config.shared_objects;
        let arguments = vec![
            json!(shared.receiver_state_id),
            json!(shared.gateway_state_id),
            json!(shared.capabilities_id),
            json!(shared.treasury_id),
            json!(shared.wormhole_core_id),
            json!(shared.token_bridge_id),
            json!(shared.token_state_id),
            json!(vaa.to_vec()),
            json!(SUI_CLOCK_OBJECT_ID),
        ];

        let tx_bytes = self
            .sui
            .build_move_call(
                self.keypair.address(),
                &self.config.common.l2_bitcoin_depositor_address,
                DEPOSITOR_MODULE,
                RECEIVE_WORMHOLE_MESSAGES,
                vec![self.config.wrapped_tbtc_type.clone()],
                arguments,
                self.config.sui_gas_object_id.as_deref(),
                BRIDGE_GAS_BUDGET,
            )
            .await?;

        let result = self.sui.execute_transaction_block(&tx_bytes, &self.keypair).await?;
        if !result.status_ok {
            return Err(HandlerError::Custom(format!(
                "Sui execution failed: {}",
                result.error.unwrap_or_else(|| "unknown status".to_string())
            )));
        }
        Ok(result.digest)
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
            VaaFetchOutcome::Fetched(vaa) => match self.submit_bridge_transaction(&vaa).await {
                Ok(digest) => {
                    deposit.hashes.l2_bridge_tx = Some(digest.clone());
                    deposit.set_status(DepositStatus::Bridged)?;
                    deposit.clear_error();
                    info!(
                        chain = %self.config.common.chain_name,
                        deposit = %deposit.id,
                        digest,
                        "deposit bridged"
                    );
                }
                Err(e) => {
                    deposit.record_error(format!("Sui bridge submission failed: {e}"));
                }
            },
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
impl super::ChainHandler for SuiHandler {
    fn chain_name(&self) -> &str {
        &self.config.common.chain_name
    }

    fn chain_type(&self) -> ChainType {
        ChainType::Sui
    }

    async fn initialize(&self) -> Result<(), HandlerError> {
        info!(
            chain = %self.config.common.chain_name,
            address = %self.keypair.address(),
            "Sui handler initialized"
        );
        Ok(())
    }

    async fn start_listening(&self, cancel: CancellationToken) -> Result<(), HandlerError> {
        if self.config.common.use_endpoint {
            info!(
                chain = %self.config.common.chain_name,
                "endpoint mode, event polling disabled"
            );
            return Ok(());
        }
        info!(chain = %self.config.common.chain_name, "starting Sui event polling");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep_random(EVENT_POLL_INTERVAL) => {}
            }
            if let Err(e) = self.poll_events().await {
                warn!(chain = %self.config.common.chain_name, error = %e, "Sui event poll failed");
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
        // Sui progress is cursor-based; the L1 tip is what matters for the
        // shared pipeline.
        Ok(self.l1.eth_client().get_block_number().await?.as_u64())
    }

    fn supports_past_deposit_check(&self) -> bool {
        false
    }

    async fn check_for_past_deposits(
        &self,
        _past_minutes: u64,
        _latest_block: u64,
    ) -> Result<(), HandlerError> {
        // The durable event cursor already replays anything missed while
        // the relayer was down.
        Ok(())
    }

    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<OnChainDepositState, HandlerError> {
        Ok(self.l1.deposit_state(id.as_u256()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::Address;
    use secp256k1::SecretKey;
    use std::str::FromStr;
    use tbtc_relay_common::types::Network;
    use tbtc_relay_config::{CommonChainConfig, SuiSharedObjects};
    use url::Url;

    fn test_handler() -> SuiHandler {
        let common = CommonChainConfig {
            chain_name: "Sui".to_string(),
            network: Network::Testnet,
            l1_rpc: Url::parse("http://127.0.0.1:1").unwrap(),
            l2_rpc: Url::parse("http://127.0.0.1:2").unwrap(),
            l2_ws_rpc: None,
            l1_bitcoin_depositor_address: Address::from_low_u64_be(1),
            l2_bitcoin_depositor_address: format!("0x{}", "11".repeat(32)),
            l2_bitcoin_redeemer_address: None,
            vault_address: Address::from_low_u64_be(0xabc),
            l2_wormhole_gateway_address: format!("0x{}", "22".repeat(32)),
            l2_wormhole_chain_id: 21,
            l1_confirmations: 1,
            l2_start_block: 0,
            use_endpoint: false,
            enable_l2_redemption: false,
            supports_reveal_deposit_api: false,
        };
        let object = |byte: &str| format!("0x{}", byte.repeat(32));
        let config = SuiChainConfig {
            common,
            l1_private_key: SecretKey::from_str(
                "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            )
            .unwrap(),
            sui_private_key: {
                use base64::Engine as _;
                let mut raw = vec![0u8];
                raw.extend_from_slice(&[5u8; 32]);
                base64::engine::general_purpose::STANDARD.encode(raw)
            },
            shared_objects: SuiSharedObjects {
                receiver_state_id: object("a1"),
                gateway_state_id: object("a2"),
                capabilities_id: object("a3"),
                treasury_id: object("a4"),
                wormhole_core_id: object("a5"),
                token_bridge_id: object("a6"),
                token_state_id: object("a7"),
            },
            wrapped_tbtc_type: "0xa8::tbtc::TBTC".to_string(),
            sui_gas_object_id: None,
        };
        let attestation = Arc::new(
            tbtc_relay_rpc::clients::attestation::AttestationClient::new(
                Url::parse("https://api.wormholescan.io/").unwrap(),
            )
            .unwrap(),
        );
        SuiHandler::new(
            config,
            Store::default(),
            attestation,
            Duration::from_secs(300),
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn raw_funding_tx() -> Vec<u8> {
        use hex_literal::hex;
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

    fn sui_event(parsed_json: Value) -> SuiEvent {
        serde_json::from_value(serde_json::json!({
            "id": { "txDigest": "9oBqDigest", "eventSeq": "0" },
            "parsedJson": parsed_json,
        }))
        .unwrap()
    }

    #[test]
    fn parses_56_byte_reveal_and_injects_configured_vault() {
        let handler = test_handler();

        let mut reveal = Vec::new();
        reveal.extend_from_slice(&5u32.to_be_bytes());
        reveal.extend_from_slice(&[0x11; 8]);
        reveal.extend_from_slice(&[0x22; 20]);
        reveal.extend_from_slice(&[0x33; 20]);
        reveal.extend_from_slice(&[0x44; 4]);
        let owner = [0xDE; 32];
        let sender = [0xAD; 32];

        let event = sui_event(serde_json::json!({
            "funding_tx": raw_funding_tx(),
            "deposit_reveal": reveal,
            "deposit_owner": owner.to_vec(),
            "sender": sender.to_vec(),
        }));

        let parsed = handler.parse_deposit_event(&event).unwrap();
        assert_eq!(parsed.reveal.funding_output_index, 5);
        assert_eq!(parsed.reveal.vault, Address::from_low_u64_be(0xabc));
        assert_eq!(parsed.l2_deposit_owner, H256::from_slice(&owner));
        assert_eq!(parsed.l2_sender, H256::from_slice(&sender));
        assert_eq!(parsed.funding_tx.version, [0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn rejects_short_reveal_and_bad_owner() {
        let handler = test_handler();

        let event = sui_event(serde_json::json!({
            "funding_tx": raw_funding_tx(),
            "deposit_reveal": vec![0u8; 55],
            "deposit_owner": vec![0u8; 32],
            "sender": vec![0u8; 32],
        }));
        assert!(handler.parse_deposit_event(&event).is_err());

        let mut reveal = vec![0u8; 56];
        reveal[3] = 1;
        let event = sui_event(serde_json::json!({
            "funding_tx": raw_funding_tx(),
            "deposit_reveal": reveal,
            "deposit_owner": vec![0u8; 20],
            "sender": vec![0u8; 32],
        }));
        assert!(handler.parse_deposit_event(&event).is_err());
    }

    #[test]
    fn move_bytes_accept_arrays_and_strings() {
        assert_eq!(
            bytes_from_move_value(&serde_json::json!([1, 2, 255])),
            Some(vec![1, 2, 255])
        );
        assert_eq!(
            bytes_from_move_value(&serde_json::json!("0xdeadbeef")),
            Some(vec![0xde, 0xad, 0xbe, 0xef])
        );
        // 256 does not fit a byte
        assert_eq!(bytes_from_move_value(&serde_json::json!([256])), None);
    }
}
