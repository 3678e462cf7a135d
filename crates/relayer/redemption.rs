//! The L2 → L1 redemption pipeline: VAA fetch and L1 submission passes.
//!
//! The attestation-sequence lookup sits behind [`SequenceIndex`] so
//! deployments can swap the bundled receipt-log reader for an external
//! indexer.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use ethereum_types::{Address, H256, U256};
use lazy_static::lazy_static;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tbtc_relay_common::types::{Redemption, RedemptionStatus};
use tbtc_relay_rpc::calldata::decode_uint;
use tbtc_relay_rpc::clients::attestation::{
    AttestationClient, AttestationError, VAA_POLL_TIMEOUT, VaaFetchOutcome,
};
use tbtc_relay_rpc::clients::eth::{EthClient, event_topic};
use tbtc_relay_storage::Store;

use crate::errors::RedemptionError;
use crate::l1::{L1Bridge, RedemptionFinalizeRequest};

lazy_static! {
    static ref LOG_MESSAGE_PUBLISHED_TOPIC: H256 =
        event_topic("LogMessagePublished(address,uint64,uint32,bytes,uint8)");
}

/// Maps a redemption's L2 transaction hash to its attestation sequence.
#[async_trait]
pub trait SequenceIndex: Send + Sync {
    async fn sequence_for(&self, l2_tx_hash: H256) -> Result<u64, RedemptionError>;
}

/// The attestation-fetch seam the VAA pass runs against; implemented by the
/// shared [`AttestationClient`], substituted in tests.
#[async_trait]
pub trait VaaFetcher: Send + Sync {
    async fn fetch_vaa(
        &self,
        emitter_chain: u16,
        emitter_address: [u8; 32],
        sequence: u64,
        deadline: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<VaaFetchOutcome, crate::errors::RedemptionError>;
}

#[async_trait]
impl VaaFetcher for AttestationClient {
    async fn fetch_vaa(
        &self,
        emitter_chain: u16,
        emitter_address: [u8; 32],
        sequence: u64,
        deadline: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<VaaFetchOutcome, crate::errors::RedemptionError> {
        AttestationClient::fetch_vaa(self, emitter_chain, emitter_address, sequence, deadline, cancel)
            .await
            .map_err(crate::errors::RedemptionError::from)
    }
}

/// The bundled lookup: reads the wormhole core `LogMessagePublished`
/// sequence out of the redemption transaction's own receipt.
#[derive(Debug)]
pub struct GatewayLogSequenceIndex {
    l2_client: EthClient,
}

impl GatewayLogSequenceIndex {
    pub fn new(l2_client: EthClient) -> Self {
        GatewayLogSequenceIndex { l2_client }
    }
}

#[async_trait]
impl SequenceIndex for GatewayLogSequenceIndex {
    async fn sequence_for(&self, l2_tx_hash: H256) -> Result<u64, RedemptionError> {
        let receipt = self
            .l2_client
            .get_transaction_receipt(l2_tx_hash)
            .await?
            .ok_or(RedemptionError::SequenceNotFound(l2_tx_hash))?;
        receipt
            .logs
            .iter()
            .find(|log| log.topics.first() == Some(&LOG_MESSAGE_PUBLISHED_TOPIC))
            .and_then(|log| decode_uint(&log.data, 0).ok())
            .map(|sequence| sequence.low_u64())
            .ok_or(RedemptionError::SequenceNotFound(l2_tx_hash))
    }
}

/// Everything the VAA-fetch pass needs for one chain.
pub struct RedemptionVaaContext<'a> {
    pub store: &'a Store,
    pub chain_name: &'a str,
    pub attestation: &'a dyn VaaFetcher,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence_index: &'a dyn SequenceIndex,
    pub retry_interval: ChronoDuration,
    pub cancel: &'a CancellationToken,
}

/// Pending and VaaFailed → VaaFetched. Returns how many records were picked
/// up.
pub async fn process_pending_redemptions(
    ctx: &RedemptionVaaContext<'_>,
) -> Result<usize, RedemptionError> {
    let mut candidates = ctx
        .store
        .get_redemptions_by_status(RedemptionStatus::Pending, ctx.chain_name)
        .await?;
    candidates.extend(
        ctx.store
            .get_redemptions_by_status(RedemptionStatus::VaaFailed, ctx.chain_name)
            .await?,
    );

    let mut processed = 0;
    for redemption in candidates {
        if !redemption.is_due(ctx.retry_interval) {
            continue;
        }
        processed += 1;
        if let Err(e) = fetch_one(ctx, redemption).await {
            error!(chain = ctx.chain_name, error = %e, "redemption VAA pass entry failed");
        }
    }
    Ok(processed)
}

async fn fetch_one(
    ctx: &RedemptionVaaContext<'_>,
    mut redemption: Redemption,
) -> Result<(), RedemptionError> {
    let sequence = match ctx.sequence_index.sequence_for(redemption.id).await {
        Ok(sequence) => sequence,
        Err(e) => {
            redemption.log(format!("sequence lookup failed: {e}"));
            redemption.set_status(RedemptionStatus::VaaFailed)?;
            ctx.store.update_redemption(redemption).await?;
            return Ok(());
        }
    };

    // Cancellation unwinds without touching the record; every other fetch
    // failure (deadline, transport, malformed body) is written onto it so
    // the retry pacing applies instead of a hot per-tick loop.
    let fetch = ctx
        .attestation
        .fetch_vaa(
            ctx.emitter_chain,
            ctx.emitter_address,
            sequence,
            VAA_POLL_TIMEOUT,
            ctx.cancel,
        )
        .await;
    let outcome = match fetch {
        Ok(outcome) => outcome,
        Err(RedemptionError::Attestation(AttestationError::Cancelled)) => return Ok(()),
        Err(RedemptionError::Attestation(e)) => VaaFetchOutcome::Failed(e.to_string()),
        Err(e) => VaaFetchOutcome::Failed(e.to_string()),
    };

    match outcome {
        VaaFetchOutcome::Fetched(vaa) => {
            info!(
                chain = ctx.chain_name,
                redemption = %redemption.id,
                sequence,
                "attestation fetched"
            );
            redemption.vaa = Some(vaa);
            redemption.log(format!("attestation fetched for sequence {sequence}"));
            redemption.set_status(RedemptionStatus::VaaFetched)?;
        }
        VaaFetchOutcome::NotReady => {
            // Not signed yet; keep the record where it is and let a later
            // tick retry.
            warn!(
                chain = ctx.chain_name,
                redemption = %redemption.id,
                sequence,
                "attestation not ready"
            );
            redemption.log("attestation not ready");
            redemption.mark_activity();
        }
        VaaFetchOutcome::Failed(reason) => {
            warn!(
                chain = ctx.chain_name,
                redemption = %redemption.id,
                reason,
                "attestation fetch failed"
            );
            redemption.log(format!("attestation fetch failed: {reason}"));
            redemption.set_status(RedemptionStatus::VaaFailed)?;
        }
    }
    ctx.store.update_redemption(redemption).await?;
    Ok(())
}

/// Everything the L1-submit pass needs for one chain.
pub struct RedemptionSubmitContext<'a> {
    pub store: &'a Store,
    pub chain_name: &'a str,
    pub l1: &'a dyn L1Bridge,
    /// L1 account credited as the redeemer of record.
    pub redeemer: Address,
    pub retry_interval: ChronoDuration,
}

/// VaaFetched → Completed. Completed records are never resubmitted.
pub async fn process_vaa_fetched_redemptions(
    ctx: &RedemptionSubmitContext<'_>,
) -> Result<usize, RedemptionError> {
    let fetched = ctx
        .store
        .get_redemptions_by_status(RedemptionStatus::VaaFetched, ctx.chain_name)
        .await?;

    let mut processed = 0;
    for redemption in fetched {
        if !redemption.is_due(ctx.retry_interval) {
            continue;
        }
        processed += 1;
        if let Err(e) = submit_one(ctx, redemption).await {
            error!(chain = ctx.chain_name, error = %e, "redemption submit pass entry failed");
        }
    }
    Ok(processed)
}

async fn submit_one(
    ctx: &RedemptionSubmitContext<'_>,
    mut redemption: Redemption,
) -> Result<(), RedemptionError> {
    // The bridge publishes the fee parameters; a failed read is transient
    // and leaves the record in VaaFetched for the next tick.
    let parameters = match ctx.l1.redemption_parameters().await {
        Ok(parameters) => parameters,
        Err(e) => {
            warn!(
                chain = ctx.chain_name,
                redemption = %redemption.id,
                error = %e,
                "redemption parameter read failed"
            );
            redemption.log(format!("redemption parameter read failed: {e}"));
            redemption.mark_activity();
            ctx.store.update_redemption(redemption).await?;
            return Ok(());
        }
    };

    let request = RedemptionFinalizeRequest {
        deposit_key: U256::from_big_endian(redemption.id.as_bytes()),
        wallet_pub_key_hash: redemption.event.wallet_pub_key_hash,
        redeemer_output_script: redemption.event.redeemer_output_script.clone(),
        amount: redemption.event.amount,
        treasury_fee: parameters.treasury_fee(redemption.event.amount),
        tx_max_fee: parameters.tx_max_fee,
        redeemer: ctx.redeemer,
    };

    match ctx.l1.finalize_l2_redemption(request).await {
        Ok(outcome) => {
            info!(
                chain = ctx.chain_name,
                redemption = %redemption.id,
                tx_hash = %outcome.tx_hash,
                "redemption finalized on L1"
            );
            redemption.l1_submission_tx_hash = Some(outcome.tx_hash);
            redemption.log(format!("finalized on L1: {:#x}", outcome.tx_hash));
            redemption.set_status(RedemptionStatus::Completed)?;
        }
        Err(e) => {
            warn!(
                chain = ctx.chain_name,
                redemption = %redemption.id,
                error = %e,
                "redemption L1 submission failed"
            );
            redemption.log(format!("L1 submission failed: {e}"));
            redemption.set_status(RedemptionStatus::Failed)?;
        }
    }
    ctx.store.update_redemption(redemption).await?;
    Ok(())
}

/// Normalizes a configured gateway/emitter address string into the 32-byte
/// emitter form: 0x EVM addresses are left-padded, 32-byte hex is taken
/// verbatim, anything else is tried as base58.
pub fn emitter_address_from_str(raw: &str) -> Option<[u8; 32]> {
    let mut out = [0u8; 32];
    if let Some(stripped) = raw.strip_prefix("0x") {
        let decoded = hex::decode(stripped).ok()?;
        match decoded.len() {
            20 => out[12..].copy_from_slice(&decoded),
            32 => out.copy_from_slice(&decoded),
            _ => return None,
        }
        return Some(out);
    }
    let decoded = bs58::decode(raw).into_vec().ok()?;
    if decoded.len() != 32 {
        return None;
    }
    out.copy_from_slice(&decoded);
    Some(out)
}
