//! Lifecycle scenarios for the deposit and redemption pipelines, run
//! against a mock L1 and the in-memory store.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration as ChronoDuration;
use ethereum_types::{Address, H256, U256};
use hex_literal::hex;
use tokio_util::sync::CancellationToken;

use tbtc_relay_common::types::{
    Deposit, DepositReveal, DepositStatus, FundingTransaction, L1OutputEvent, MainUtxo,
    Redemption, RedemptionEvent, RedemptionStatus, deposit_key,
};
use tbtc_relay_core::errors::{L1Error, RedemptionError};
use tbtc_relay_core::l1::{
    L1Bridge, OnChainDepositState, RedemptionFinalizeRequest, RedemptionParameters, TxOutcome,
};
use tbtc_relay_core::pipeline::{
    self, BRIDGE_DELAY_SENTINEL, FinalizeBehavior, PipelineContext,
};
use tbtc_relay_core::redemption::{
    RedemptionSubmitContext, RedemptionVaaContext, SequenceIndex, VaaFetcher,
    process_pending_redemptions, process_vaa_fetched_redemptions,
};
use tbtc_relay_rpc::clients::attestation::{AttestationError, VaaFetchOutcome};
use tbtc_relay_storage::Store;

const CHAIN: &str = "BaseSepolia";

const TREASURY_FEE_DIVISOR: u64 = 2_000;
const TX_MAX_FEE: u64 = 100_000;

#[derive(Default)]
struct MockL1 {
    chain_state: Mutex<HashMap<U256, OnChainDepositState>>,
    initialize_calls: Mutex<Vec<U256>>,
    finalize_calls: Mutex<Vec<U256>>,
    redemption_calls: Mutex<Vec<RedemptionFinalizeRequest>>,
    finalize_revert_reason: Mutex<Option<String>>,
    initialize_reverts_on_chain: Mutex<bool>,
    transfer_sequence: Mutex<u64>,
}

impl MockL1 {
    fn set_chain_state(&self, key: U256, state: OnChainDepositState) {
        self.chain_state.lock().unwrap().insert(key, state);
    }

    fn initialize_call_count(&self) -> usize {
        self.initialize_calls.lock().unwrap().len()
    }

    fn finalize_call_count(&self) -> usize {
        self.finalize_calls.lock().unwrap().len()
    }

    fn redemption_call_count(&self) -> usize {
        self.redemption_calls.lock().unwrap().len()
    }

    fn last_redemption_call(&self) -> Option<RedemptionFinalizeRequest> {
        self.redemption_calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl L1Bridge for MockL1 {
    async fn deposit_state(&self, key: U256) -> Result<OnChainDepositState, L1Error> {
        Ok(self
            .chain_state
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(OnChainDepositState::Unknown))
    }

    async fn quote_finalize_deposit(&self) -> Result<U256, L1Error> {
        Ok(U256::from(10_000u64))
    }

    async fn initialize_deposit(&self, event: &L1OutputEvent) -> Result<TxOutcome, L1Error> {
        let key = U256::from_big_endian(
            deposit_key(
                event.funding_tx.tx_hash(),
                event.reveal.funding_output_index,
            )
            .as_bytes(),
        );
        self.initialize_calls.lock().unwrap().push(key);

        if *self.initialize_reverts_on_chain.lock().unwrap() {
            return Err(L1Error::Reverted {
                tx_hash: H256::from_low_u64_be(0xBAD),
            });
        }
        self.set_chain_state(key, OnChainDepositState::Initialized);
        Ok(TxOutcome {
            tx_hash: H256::from_low_u64_be(0x11),
            transfer_sequence: None,
        })
    }

    async fn finalize_deposit(&self, key: U256, _value: U256) -> Result<TxOutcome, L1Error> {
        if let Some(reason) = self.finalize_revert_reason.lock().unwrap().clone() {
            return Err(L1Error::PreflightRevert { reason });
        }
        self.finalize_calls.lock().unwrap().push(key);
        self.set_chain_state(key, OnChainDepositState::Finalized);
        Ok(TxOutcome {
            tx_hash: H256::from_low_u64_be(0x22),
            transfer_sequence: Some(*self.transfer_sequence.lock().unwrap()),
        })
    }

    async fn redemption_parameters(&self) -> Result<RedemptionParameters, L1Error> {
        Ok(RedemptionParameters {
            treasury_fee_divisor: TREASURY_FEE_DIVISOR,
            tx_max_fee: TX_MAX_FEE,
        })
    }

    async fn finalize_l2_redemption(
        &self,
        request: RedemptionFinalizeRequest,
    ) -> Result<TxOutcome, L1Error> {
        self.redemption_calls.lock().unwrap().push(request);
        Ok(TxOutcome {
            tx_hash: H256::from_low_u64_be(0x33),
            transfer_sequence: None,
        })
    }
}

fn sample_deposit(index: u32) -> Deposit {
    let event = L1OutputEvent {
        funding_tx: FundingTransaction {
            version: hex!("02000000"),
            input_vector: Bytes::from_static(&hex!(
                "01c0ffee0000000000000000000000000000000000000000000000000000000000000000ffffffff00ffffffff"
            )),
            output_vector: Bytes::from_static(&hex!(
                "0150c3000000000000160014deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
            )),
            locktime: hex!("00000000"),
        },
        reveal: DepositReveal {
            funding_output_index: index,
            blinding_factor: hex!("f9f0c90d00039523"),
            wallet_pub_key_hash: hex!("8db50eb52063ea9d98b3eac91489a90f738986f6"),
            refund_pub_key_hash: hex!("28e081f285138ccbe389c1eb8985716230129f89"),
            refund_locktime: hex!("60bcea61"),
            vault: Address::from_low_u64_be(7),
        },
        l2_deposit_owner: H256::from_slice(&hex!(
            "000000000000000000000000abcdabcdabcdabcdabcdabcdabcdabcdabcdabcd"
        )),
        l2_sender: H256::from_low_u64_be(0x99),
    };
    Deposit::new(CHAIN, event)
}

fn ctx<'a>(store: &'a Store, l1: &'a MockL1) -> PipelineContext<'a> {
    PipelineContext {
        store,
        l1,
        chain_name: CHAIN,
        retry_interval: ChronoDuration::zero(),
    }
}

#[tokio::test]
async fn happy_path_reaches_awaiting_attestation() {
    let store = Store::default();
    let l1 = MockL1::default();
    *l1.transfer_sequence.lock().unwrap() = 777;

    let deposit = sample_deposit(0);
    let id = deposit.id;
    store.create_deposit(deposit).await.unwrap();

    let processed = pipeline::process_initialize_deposits(&ctx(&store, &l1))
        .await
        .unwrap();
    assert_eq!(processed, 1);
    assert_eq!(l1.initialize_call_count(), 1);

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Initialized);
    assert!(record.hashes.l1_initialize_tx.is_some());
    assert!(record.last_error.is_none());
    assert!(record.dates.initialized_at.is_some());

    let processed = pipeline::process_finalize_deposits(
        &ctx(&store, &l1),
        FinalizeBehavior::default(),
    )
    .await
    .unwrap();
    assert_eq!(processed, 1);
    assert_eq!(l1.finalize_call_count(), 1);

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::AwaitingAttestation);
    let info = record.attestation_info.unwrap();
    assert_eq!(info.transfer_sequence, 777);
    assert_eq!(record.hashes.l1_finalize_tx, Some(info.l1_tx_hash));
    assert!(record.dates.finalized_at.is_some());
}

#[tokio::test]
async fn initialized_on_chain_sends_no_second_transaction() {
    let store = Store::default();
    let l1 = MockL1::default();

    let deposit = sample_deposit(1);
    let id = deposit.id;
    l1.set_chain_state(id.as_u256(), OnChainDepositState::Initialized);
    store.create_deposit(deposit).await.unwrap();

    pipeline::process_initialize_deposits(&ctx(&store, &l1))
        .await
        .unwrap();

    // Reconciled, and the on-chain state means no new transaction.
    assert_eq!(l1.initialize_call_count(), 0);
    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Initialized);

    // A second pass is a no-op too: the record is out of Queued.
    pipeline::process_initialize_deposits(&ctx(&store, &l1))
        .await
        .unwrap();
    assert_eq!(l1.initialize_call_count(), 0);
}

#[tokio::test]
async fn queued_record_reconciles_straight_to_finalized() {
    let store = Store::default();
    let l1 = MockL1::default();

    let deposit = sample_deposit(2);
    let id = deposit.id;
    l1.set_chain_state(id.as_u256(), OnChainDepositState::Finalized);
    store.create_deposit(deposit).await.unwrap();

    pipeline::process_initialize_deposits(&ctx(&store, &l1))
        .await
        .unwrap();

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Finalized);
    assert_eq!(l1.initialize_call_count(), 0);
    assert_eq!(l1.finalize_call_count(), 0);
}

#[tokio::test]
async fn initialized_record_reconciles_to_finalized_without_writes() {
    let store = Store::default();
    let l1 = MockL1::default();

    let mut deposit = sample_deposit(3);
    deposit.set_status(DepositStatus::Initialized).unwrap();
    let id = deposit.id;
    l1.set_chain_state(id.as_u256(), OnChainDepositState::Finalized);
    store.create_deposit(deposit).await.unwrap();

    pipeline::process_finalize_deposits(&ctx(&store, &l1), FinalizeBehavior::default())
        .await
        .unwrap();

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Finalized);
    assert_eq!(l1.finalize_call_count(), 0);
}

#[tokio::test]
async fn bridge_delay_sentinel_keeps_status_and_bumps_activity() {
    let store = Store::default();
    let l1 = MockL1::default();
    *l1.finalize_revert_reason.lock().unwrap() =
        Some(format!("execution reverted: {BRIDGE_DELAY_SENTINEL}"));

    let mut deposit = sample_deposit(4);
    deposit.set_status(DepositStatus::Initialized).unwrap();
    let id = deposit.id;
    let activity_before = deposit.dates.last_activity_at;
    l1.set_chain_state(id.as_u256(), OnChainDepositState::Initialized);
    store.create_deposit(deposit).await.unwrap();

    pipeline::process_finalize_deposits(&ctx(&store, &l1), FinalizeBehavior::default())
        .await
        .unwrap();

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Initialized);
    assert!(record.last_error.is_none());
    assert!(record.dates.last_activity_at >= activity_before);
}

#[tokio::test]
async fn other_finalize_reverts_record_last_error() {
    let store = Store::default();
    let l1 = MockL1::default();
    *l1.finalize_revert_reason.lock().unwrap() = Some("Caller is not the owner".to_string());

    let mut deposit = sample_deposit(5);
    deposit.set_status(DepositStatus::Initialized).unwrap();
    let id = deposit.id;
    l1.set_chain_state(id.as_u256(), OnChainDepositState::Initialized);
    store.create_deposit(deposit).await.unwrap();

    pipeline::process_finalize_deposits(&ctx(&store, &l1), FinalizeBehavior::default())
        .await
        .unwrap();

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Initialized);
    let reason = record.last_error.unwrap();
    assert!(reason.contains("Caller is not the owner"));
}

#[tokio::test]
async fn post_send_revert_keeps_deposit_queued_for_clean_retry() {
    let store = Store::default();
    let l1 = MockL1::default();
    *l1.initialize_reverts_on_chain.lock().unwrap() = true;

    let deposit = sample_deposit(6);
    let id = deposit.id;
    store.create_deposit(deposit).await.unwrap();

    pipeline::process_initialize_deposits(&ctx(&store, &l1))
        .await
        .unwrap();

    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Queued);
    assert!(record.last_error.unwrap().contains("reverted"));

    // A later tick retries once the revert cause is gone.
    *l1.initialize_reverts_on_chain.lock().unwrap() = false;
    pipeline::process_initialize_deposits(&ctx(&store, &l1))
        .await
        .unwrap();
    let record = store.get_deposit(id).await.unwrap().unwrap();
    assert_eq!(record.status, DepositStatus::Initialized);
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn records_inside_retry_interval_are_skipped() {
    let store = Store::default();
    let l1 = MockL1::default();

    let mut deposit = sample_deposit(7);
    deposit.mark_activity();
    store.create_deposit(deposit).await.unwrap();

    let ctx = PipelineContext {
        store: &store,
        l1: &l1,
        chain_name: CHAIN,
        retry_interval: ChronoDuration::minutes(5),
    };
    let processed = pipeline::process_initialize_deposits(&ctx).await.unwrap();
    assert_eq!(processed, 0);
    assert_eq!(l1.initialize_call_count(), 0);
}

#[tokio::test]
async fn starknet_style_finalize_uses_fee_floor_and_stays_finalized() {
    let store = Store::default();
    let l1 = MockL1::default();

    let mut deposit = sample_deposit(8);
    deposit.set_status(DepositStatus::Initialized).unwrap();
    let id = deposit.id;
    l1.set_chain_state(id.as_u256(), OnChainDepositState::Initialized);
    store.create_deposit(deposit).await.unwrap();

    let behavior = FinalizeBehavior {
        track_attestation: false,
        min_fee_wei: U256::from(1_000_000u64),
    };
    pipeline::process_finalize_deposits(&ctx(&store, &l1), behavior)
        .await
        .unwrap();

    let record = store.get_deposit(id).await.unwrap().unwrap();
    // No attestation tracking: the record parks in Finalized until the L1
    // bridge event flips it.
    assert_eq!(record.status, DepositStatus::Finalized);
    assert!(record.attestation_info.is_none());
}

// --- redemption pipeline ---

struct ScriptedFetcher {
    outcomes: Mutex<VecDeque<VaaFetchOutcome>>,
    calls: Mutex<usize>,
}

impl ScriptedFetcher {
    fn new(outcomes: Vec<VaaFetchOutcome>) -> Self {
        ScriptedFetcher {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl VaaFetcher for ScriptedFetcher {
    async fn fetch_vaa(
        &self,
        _emitter_chain: u16,
        _emitter_address: [u8; 32],
        _sequence: u64,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> Result<VaaFetchOutcome, RedemptionError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(VaaFetchOutcome::NotReady))
    }
}

struct FixedSequence(u64);

#[async_trait]
impl SequenceIndex for FixedSequence {
    async fn sequence_for(&self, _l2_tx_hash: H256) -> Result<u64, RedemptionError> {
        Ok(self.0)
    }
}

fn sample_redemption(id: u64) -> Redemption {
    Redemption::new(
        H256::from_low_u64_be(id),
        CHAIN,
        RedemptionEvent {
            wallet_pub_key_hash: hex!("8db50eb52063ea9d98b3eac91489a90f738986f6"),
            main_utxo: MainUtxo {
                tx_hash: H256::from_low_u64_be(77),
                output_index: 1,
                value: 730_000,
            },
            redeemer_output_script: Bytes::from_static(&hex!(
                "160014deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
            )),
            amount: U256::from(1_000_000u64),
        },
    )
}

#[tokio::test]
async fn vaa_not_ready_then_ready() {
    let store = Store::default();
    let cancel = CancellationToken::new();
    let sequence_index = FixedSequence(9);
    // base64 "AAAA" decodes to three zero bytes.
    let fetcher = ScriptedFetcher::new(vec![
        VaaFetchOutcome::NotReady,
        VaaFetchOutcome::NotReady,
        VaaFetchOutcome::Fetched(Bytes::from_static(&[0, 0, 0])),
    ]);

    let redemption = sample_redemption(1);
    let id = redemption.id;
    store.create_redemption(redemption).await.unwrap();

    let ctx = RedemptionVaaContext {
        store: &store,
        chain_name: CHAIN,
        attestation: &fetcher,
        emitter_chain: 30,
        emitter_address: [0xAA; 32],
        sequence_index: &sequence_index,
        retry_interval: ChronoDuration::zero(),
        cancel: &cancel,
    };

    for expected in [RedemptionStatus::Pending, RedemptionStatus::Pending] {
        process_pending_redemptions(&ctx).await.unwrap();
        let record = store.get_redemption(id).await.unwrap().unwrap();
        assert_eq!(record.status, expected);
        assert!(record.vaa.is_none());
    }

    process_pending_redemptions(&ctx).await.unwrap();
    let record = store.get_redemption(id).await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::VaaFetched);
    assert_eq!(record.vaa, Some(Bytes::from_static(&[0, 0, 0])));
    assert_eq!(*fetcher.calls.lock().unwrap(), 3);
}

#[tokio::test]
async fn failed_fetch_parks_in_vaa_failed_and_is_retried() {
    let store = Store::default();
    let cancel = CancellationToken::new();
    let sequence_index = FixedSequence(4);
    let fetcher = ScriptedFetcher::new(vec![
        VaaFetchOutcome::Failed("attestation API rejected request: 400".to_string()),
        VaaFetchOutcome::Fetched(Bytes::from_static(&[9])),
    ]);

    let redemption = sample_redemption(2);
    let id = redemption.id;
    store.create_redemption(redemption).await.unwrap();

    let ctx = RedemptionVaaContext {
        store: &store,
        chain_name: CHAIN,
        attestation: &fetcher,
        emitter_chain: 30,
        emitter_address: [0xAA; 32],
        sequence_index: &sequence_index,
        retry_interval: ChronoDuration::zero(),
        cancel: &cancel,
    };

    process_pending_redemptions(&ctx).await.unwrap();
    let record = store.get_redemption(id).await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::VaaFailed);
    assert!(record.logs.iter().any(|l| l.contains("400")));

    // VaaFailed records re-enter the fetch pass.
    process_pending_redemptions(&ctx).await.unwrap();
    let record = store.get_redemption(id).await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::VaaFetched);
}

#[tokio::test]
async fn completed_redemption_submits_no_further_transaction() {
    let store = Store::default();
    let l1 = MockL1::default();

    let mut redemption = sample_redemption(3);
    redemption.set_status(RedemptionStatus::VaaFetched).unwrap();
    redemption.vaa = Some(Bytes::from_static(&[1, 2, 3]));
    let id = redemption.id;
    store.create_redemption(redemption).await.unwrap();

    let ctx = RedemptionSubmitContext {
        store: &store,
        chain_name: CHAIN,
        l1: &l1,
        redeemer: Address::from_low_u64_be(42),
        retry_interval: ChronoDuration::zero(),
    };

    let processed = process_vaa_fetched_redemptions(&ctx).await.unwrap();
    assert_eq!(processed, 1);
    assert_eq!(l1.redemption_call_count(), 1);

    // Fee arguments come from the bridge's published parameters.
    let request = l1.last_redemption_call().unwrap();
    assert_eq!(request.treasury_fee, 1_000_000 / TREASURY_FEE_DIVISOR);
    assert_eq!(request.tx_max_fee, TX_MAX_FEE);
    assert_eq!(request.amount, U256::from(1_000_000u64));

    let record = store.get_redemption(id).await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::Completed);
    assert_eq!(
        record.l1_submission_tx_hash,
        Some(H256::from_low_u64_be(0x33))
    );

    // Re-running the pass picks nothing up.
    let processed = process_vaa_fetched_redemptions(&ctx).await.unwrap();
    assert_eq!(processed, 0);
    assert_eq!(l1.redemption_call_count(), 1);
}

/// Fetch seam that fails hard instead of returning an outcome.
struct ErringFetcher(fn() -> RedemptionError);

#[async_trait]
impl VaaFetcher for ErringFetcher {
    async fn fetch_vaa(
        &self,
        _emitter_chain: u16,
        _emitter_address: [u8; 32],
        _sequence: u64,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> Result<VaaFetchOutcome, RedemptionError> {
        Err((self.0)())
    }
}

#[tokio::test]
async fn attestation_deadline_is_recorded_and_paced() {
    let store = Store::default();
    let cancel = CancellationToken::new();
    let sequence_index = FixedSequence(11);
    let fetcher =
        ErringFetcher(|| RedemptionError::Attestation(AttestationError::DeadlineExceeded));

    let redemption = sample_redemption(4);
    let id = redemption.id;
    store.create_redemption(redemption).await.unwrap();

    let ctx = RedemptionVaaContext {
        store: &store,
        chain_name: CHAIN,
        attestation: &fetcher,
        emitter_chain: 30,
        emitter_address: [0xAA; 32],
        sequence_index: &sequence_index,
        retry_interval: ChronoDuration::zero(),
        cancel: &cancel,
    };
    process_pending_redemptions(&ctx).await.unwrap();

    // The timeout lands on the record: failed status, a logged reason, and
    // a bumped activity clock so the retry pacing applies.
    let record = store.get_redemption(id).await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::VaaFailed);
    assert!(record.logs.iter().any(|l| l.contains("deadline")));
    assert!(record.dates.last_activity_at.is_some());
}

#[tokio::test]
async fn cancellation_unwinds_without_mutating_the_record() {
    let store = Store::default();
    let cancel = CancellationToken::new();
    let sequence_index = FixedSequence(12);
    let fetcher = ErringFetcher(|| RedemptionError::Attestation(AttestationError::Cancelled));

    let redemption = sample_redemption(5);
    let id = redemption.id;
    store.create_redemption(redemption).await.unwrap();

    let ctx = RedemptionVaaContext {
        store: &store,
        chain_name: CHAIN,
        attestation: &fetcher,
        emitter_chain: 30,
        emitter_address: [0xAA; 32],
        sequence_index: &sequence_index,
        retry_interval: ChronoDuration::zero(),
        cancel: &cancel,
    };
    process_pending_redemptions(&ctx).await.unwrap();

    let record = store.get_redemption(id).await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::Pending);
    assert!(record.logs.is_empty());
    assert!(record.dates.last_activity_at.is_none());
}

#[tokio::test]
async fn deposit_ids_are_chain_agnostic_and_deterministic() {
    let a = sample_deposit(0);
    let b = sample_deposit(0);
    assert_eq!(a.id, b.id);
    assert_ne!(a.id, sample_deposit(1).id);
}
