//! The shared initialize/finalize machinery every handler composes.
//!
//! Batch passes read due records from the store, reconcile them against the
//! on-chain deposit state, and only then spend gas. Failures never advance a
//! record; the next tick retries, paced by `last_activity_at`.

use chrono::Duration as ChronoDuration;
use ethereum_types::U256;
use tracing::{error, info, warn};

use tbtc_relay_common::types::{Deposit, DepositStatus};
use tbtc_relay_storage::Store;

use crate::errors::{HandlerError, L1Error};
use crate::l1::{L1Bridge, OnChainDepositState};

/// Revert reason the L1 depositor surfaces while the Bitcoin side has not
/// caught up. Not an error; the deposit is retried later.
pub const BRIDGE_DELAY_SENTINEL: &str = "Deposit not finalized by the bridge";

#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub store: &'a Store,
    pub l1: &'a dyn L1Bridge,
    pub chain_name: &'a str,
    pub retry_interval: ChronoDuration,
}

/// How the finalize pass completes a deposit on a given chain family.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeBehavior {
    /// Parse the transfer sequence out of the finalize receipt and park the
    /// deposit in AwaitingAttestation for the bridging pass.
    pub track_attestation: bool,
    /// Floor for the fee attached as msg.value when the live quote comes
    /// back lower (Starknet ships a configured fallback).
    pub min_fee_wei: U256,
}

impl Default for FinalizeBehavior {
    fn default() -> Self {
        FinalizeBehavior {
            track_attestation: true,
            min_fee_wei: U256::zero(),
        }
    }
}

async fn persist(ctx: &PipelineContext<'_>, deposit: &Deposit) -> Result<(), HandlerError> {
    if let Err(e) = ctx.store.update_deposit(deposit.clone()).await {
        // A failed persist must not advance anything; the next tick re-reads
        // the durable state and retries.
        error!(
            chain = ctx.chain_name,
            deposit = %deposit.id,
            error = %e,
            "failed to persist deposit update"
        );
        return Err(HandlerError::Store(e));
    }
    Ok(())
}

/// Drives Queued deposits to Initialized. Returns how many records were
/// picked up.
pub async fn process_initialize_deposits(ctx: &PipelineContext<'_>) -> Result<usize, HandlerError> {
    let queued = ctx
        .store
        .get_deposits_by_status(DepositStatus::Queued, ctx.chain_name)
        .await?;

    let mut processed = 0;
    for deposit in queued {
        if !deposit.is_due(ctx.retry_interval) {
            continue;
        }
        processed += 1;
        if let Err(e) = initialize_one(ctx, deposit).await {
            error!(chain = ctx.chain_name, error = %e, "initialize pass entry failed");
        }
    }
    Ok(processed)
}

/// Event-driven fast path: runs the initialize step for a single deposit id
/// right after ingestion, skipping the retry pacing.
pub async fn initialize_deposit_now(
    ctx: &PipelineContext<'_>,
    deposit: Deposit,
) -> Result<(), HandlerError> {
    if deposit.status != DepositStatus::Queued {
        return Ok(());
    }
    initialize_one(ctx, deposit).await
}

/// Event-driven fast path: runs the finalize step for a single deposit as
/// soon as its optimistic mint lands, skipping the retry pacing.
pub async fn finalize_deposit_now(
    ctx: &PipelineContext<'_>,
    behavior: FinalizeBehavior,
    deposit: Deposit,
) -> Result<(), HandlerError> {
    if deposit.status != DepositStatus::Initialized {
        return Ok(());
    }
    finalize_one(ctx, behavior, deposit).await
}

async fn initialize_one(
    ctx: &PipelineContext<'_>,
    mut deposit: Deposit,
) -> Result<(), HandlerError> {
    let on_chain = match ctx.l1.deposit_state(deposit.id.as_u256()).await {
        Ok(state) => state,
        Err(e) => {
            deposit.record_error(format!("deposit state read failed: {e}"));
            return persist(ctx, &deposit).await;
        }
    };

    match on_chain {
        OnChainDepositState::Initialized => {
            info!(chain = ctx.chain_name, deposit = %deposit.id, "reconciling to Initialized");
            deposit.set_status(DepositStatus::Initialized)?;
            deposit.clear_error();
            persist(ctx, &deposit).await
        }
        OnChainDepositState::Finalized => {
            info!(chain = ctx.chain_name, deposit = %deposit.id, "reconciling to Finalized");
            deposit.set_status(DepositStatus::Finalized)?;
            deposit.clear_error();
            persist(ctx, &deposit).await
        }
        OnChainDepositState::Queued | OnChainDepositState::Unknown => {
            match ctx.l1.initialize_deposit(&deposit.l1_output_event).await {
                Ok(outcome) => {
                    deposit.hashes.l1_initialize_tx = Some(outcome.tx_hash);
                    deposit.set_status(DepositStatus::Initialized)?;
                    deposit.clear_error();
                    persist(ctx, &deposit).await
                }
                Err(L1Error::Reverted { tx_hash }) => {
                    // Post-send revert: the deposit stays Queued for a clean
                    // retry.
                    warn!(
                        chain = ctx.chain_name,
                        deposit = %deposit.id,
                        %tx_hash,
                        "initializeDeposit reverted on chain"
                    );
                    deposit.record_error(format!("initializeDeposit reverted: {tx_hash:#x}"));
                    persist(ctx, &deposit).await
                }
                Err(e) => {
                    deposit.record_error(format!("initializeDeposit failed: {e}"));
                    persist(ctx, &deposit).await
                }
            }
        }
    }
}

/// Drives Initialized deposits to Finalized (and onwards to
/// AwaitingAttestation where the chain family tracks attestations).
pub async fn process_finalize_deposits(
    ctx: &PipelineContext<'_>,
    behavior: FinalizeBehavior,
) -> Result<usize, HandlerError> {
    let initialized = ctx
        .store
        .get_deposits_by_status(DepositStatus::Initialized, ctx.chain_name)
        .await?;

    let mut processed = 0;
    for deposit in initialized {
        if !deposit.is_due(ctx.retry_interval) {
            continue;
        }
        processed += 1;
        if let Err(e) = finalize_one(ctx, behavior, deposit).await {
            error!(chain = ctx.chain_name, error = %e, "finalize pass entry failed");
        }
    }
    Ok(processed)
}

async fn finalize_one(
    ctx: &PipelineContext<'_>,
    behavior: FinalizeBehavior,
    mut deposit: Deposit,
) -> Result<(), HandlerError> {
    let on_chain = match ctx.l1.deposit_state(deposit.id.as_u256()).await {
        Ok(state) => state,
        Err(e) => {
            deposit.record_error(format!("deposit state read failed: {e}"));
            return persist(ctx, &deposit).await;
        }
    };

    if on_chain == OnChainDepositState::Finalized {
        info!(chain = ctx.chain_name, deposit = %deposit.id, "reconciling to Finalized");
        deposit.set_status(DepositStatus::Finalized)?;
        if behavior.track_attestation && deposit.attestation_info.is_some() {
            deposit.set_status(DepositStatus::AwaitingAttestation)?;
        }
        deposit.clear_error();
        return persist(ctx, &deposit).await;
    }

    let quote = match ctx.l1.quote_finalize_deposit().await {
        Ok(quote) => quote,
        Err(e) => {
            deposit.record_error(format!("quoteFinalizeDeposit failed: {e}"));
            return persist(ctx, &deposit).await;
        }
    };
    let value = quote.max(behavior.min_fee_wei);

    match ctx.l1.finalize_deposit(deposit.id.as_u256(), value).await {
        Ok(outcome) => {
            deposit.hashes.l1_finalize_tx = Some(outcome.tx_hash);
            deposit.set_status(DepositStatus::Finalized)?;
            if behavior.track_attestation {
                if let Some(transfer_sequence) = outcome.transfer_sequence {
                    deposit.attestation_info = Some(tbtc_relay_common::types::AttestationInfo {
                        transfer_sequence,
                        l1_tx_hash: outcome.tx_hash,
                    });
                    deposit.set_status(DepositStatus::AwaitingAttestation)?;
                }
            }
            deposit.clear_error();
            persist(ctx, &deposit).await
        }
        Err(L1Error::PreflightRevert { reason }) if reason.contains(BRIDGE_DELAY_SENTINEL) => {
            // The mint is simply not ready; bump the pacing clock and retry
            // on a later tick without flagging an error.
            warn!(
                chain = ctx.chain_name,
                deposit = %deposit.id,
                "finalizeDeposit deferred: {reason}"
            );
            deposit.mark_activity();
            persist(ctx, &deposit).await
        }
        Err(e) => {
            deposit.record_error(format!("finalizeDeposit failed: {e}"));
            persist(ctx, &deposit).await
        }
    }
}
