//! The reveal-endpoint seam.
//!
//! Endpoint mode replaces live L2 listeners with an external HTTP service
//! that forwards deposit reveals here. The HTTP layer itself lives outside
//! this workspace; this module is the typed, validated entry point it calls.

use ethereum_types::H256;
use serde::Deserialize;
use tracing::info;

use tbtc_relay_common::serde_utils;
use tbtc_relay_common::types::{Deposit, DepositId, DepositReveal, FundingTransaction, L1OutputEvent};
use tbtc_relay_config::CommonChainConfig;
use tbtc_relay_storage::{Store, StoreError};

use crate::errors::IngestError;

/// A deposit reveal as posted by the external intake endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RevealRequest {
    pub funding_tx: FundingTransaction,
    pub reveal: DepositReveal,
    pub l2_deposit_owner: H256,
    #[serde(default)]
    pub l2_sender: Option<H256>,
    /// Raw funding transaction alternative: when set, it is split here and
    /// `funding_tx` fields are ignored by the caller convention.
    #[serde(default, with = "serde_utils::bytes_opt")]
    pub raw_funding_tx: Option<bytes::Bytes>,
}

/// Validates and persists a revealed deposit as Queued. Replaying a known
/// reveal returns the existing id without touching the record.
pub async fn ingest_reveal(
    store: &Store,
    config: &CommonChainConfig,
    request: RevealRequest,
) -> Result<DepositId, IngestError> {
    if !config.use_endpoint || !config.supports_reveal_deposit_api {
        return Err(IngestError::EndpointDisabled(config.chain_name.clone()));
    }

    if request.reveal.vault != config.vault_address {
        return Err(IngestError::VaultMismatch {
            expected: format!("{:#x}", config.vault_address),
            got: format!("{:#x}", request.reveal.vault),
        });
    }

    let funding_tx = match &request.raw_funding_tx {
        Some(raw) => FundingTransaction::parse(raw)?,
        None => request.funding_tx.clone(),
    };

    let event = L1OutputEvent {
        funding_tx,
        reveal: request.reveal,
        l2_deposit_owner: request.l2_deposit_owner,
        l2_sender: request.l2_sender.unwrap_or(request.l2_deposit_owner),
    };
    let deposit = Deposit::new(&config.chain_name, event);
    let deposit_id = deposit.id;

    match store.create_deposit(deposit).await {
        Ok(()) => {
            info!(
                chain = %config.chain_name,
                deposit = %deposit_id,
                "deposit queued from reveal endpoint"
            );
            Ok(deposit_id)
        }
        Err(StoreError::AlreadyExists(_)) => Ok(deposit_id),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ethereum_types::Address;
    use hex_literal::hex;
    use tbtc_relay_common::types::Network;
    use url::Url;

    fn config(use_endpoint: bool, supports_api: bool) -> CommonChainConfig {
        CommonChainConfig {
            chain_name: "Solana".to_string(),
            network: Network::Testnet,
            l1_rpc: Url::parse("https://l1.example.org").unwrap(),
            l2_rpc: Url::parse("https://l2.example.org").unwrap(),
            l2_ws_rpc: None,
            l1_bitcoin_depositor_address: Address::from_low_u64_be(1),
            l2_bitcoin_depositor_address: "depositor".to_string(),
            l2_bitcoin_redeemer_address: None,
            vault_address: Address::from_low_u64_be(7),
            l2_wormhole_gateway_address: "gateway".to_string(),
            l2_wormhole_chain_id: 1,
            l1_confirmations: 1,
            l2_start_block: 0,
            use_endpoint,
            enable_l2_redemption: false,
            supports_reveal_deposit_api: supports_api,
        }
    }

    fn request(vault: Address) -> RevealRequest {
        RevealRequest {
            funding_tx: FundingTransaction {
                version: hex!("02000000"),
                input_vector: Bytes::from_static(&[0x01, 0xaa]),
                output_vector: Bytes::from_static(&[0x01, 0xbb]),
                locktime: hex!("00000000"),
            },
            reveal: DepositReveal {
                funding_output_index: 0,
                blinding_factor: [1u8; 8],
                wallet_pub_key_hash: [2u8; 20],
                refund_pub_key_hash: [3u8; 20],
                refund_locktime: [4u8; 4],
                vault,
            },
            l2_deposit_owner: H256::from_low_u64_be(55),
            l2_sender: None,
            raw_funding_tx: None,
        }
    }

    #[tokio::test]
    async fn reveal_creates_queued_deposit_idempotently() {
        let store = Store::default();
        let config = config(true, true);
        let vault = config.vault_address;

        let first = ingest_reveal(&store, &config, request(vault)).await.unwrap();
        let second = ingest_reveal(&store, &config, request(vault)).await.unwrap();
        assert_eq!(first, second);

        let deposit = store.get_deposit(first).await.unwrap().unwrap();
        assert_eq!(deposit.chain_name, "Solana");
        assert_eq!(
            deposit.l1_output_event.l2_sender,
            H256::from_low_u64_be(55)
        );
    }

    #[tokio::test]
    async fn gates_on_endpoint_flags() {
        let store = Store::default();
        let cfg = config(false, true);
        let vault = cfg.vault_address;
        assert!(matches!(
            ingest_reveal(&store, &cfg, request(vault)).await,
            Err(IngestError::EndpointDisabled(_))
        ));

        let cfg = config(true, false);
        assert!(matches!(
            ingest_reveal(&store, &cfg, request(vault)).await,
            Err(IngestError::EndpointDisabled(_))
        ));
    }

    #[tokio::test]
    async fn foreign_vault_is_rejected() {
        let store = Store::default();
        let cfg = config(true, true);
        let result = ingest_reveal(&store, &cfg, request(Address::from_low_u64_be(999))).await;
        assert!(matches!(result, Err(IngestError::VaultMismatch { .. })));
    }
}
