use crate::errors::{RevealParseError, StateTransitionError};
use crate::serde_utils;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Derives the canonical deposit key from the Bitcoin funding transaction
/// hash and output index.
///
/// `keccak256(fundingTxHash ‖ be_u32(fundingOutputIndex))`, with the funding
/// tx hash in Bitcoin internal (non-reversed) byte order. The same
/// derivation is used for every chain family.
pub fn deposit_key(funding_tx_hash: H256, funding_output_index: u32) -> H256 {
    let mut preimage = [0u8; 36];
    preimage[..32].copy_from_slice(funding_tx_hash.as_bytes());
    preimage[32..].copy_from_slice(&funding_output_index.to_be_bytes());
    keccak(preimage)
}

/// Canonical deposit identifier. Hash over the funding outpoint, also
/// expressible as a big-endian uint256 for on-chain calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositId(pub H256);

impl DepositId {
    pub fn from_funding_outpoint(funding_tx_hash: H256, funding_output_index: u32) -> Self {
        DepositId(deposit_key(funding_tx_hash, funding_output_index))
    }

    /// The on-chain representation: the id bytes read as a big-endian uint256.
    pub fn as_u256(&self) -> U256 {
        U256::from_big_endian(self.0.as_bytes())
    }

    /// Canonical string form: lowercase hex, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<H256> for DepositId {
    fn from(h: H256) -> Self {
        DepositId(h)
    }
}

/// Lifecycle state of a deposit. Transitions are monotonic; see
/// [`DepositStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepositStatus {
    Queued,
    Initialized,
    Finalized,
    AwaitingAttestation,
    Bridged,
    Error,
}

impl DepositStatus {
    /// Forward moves only, except the single recovery pair
    /// Finalized ⇄ AwaitingAttestation (a re-parse of the same receipt is
    /// idempotent). Any state may move to Error.
    pub fn can_transition_to(self, next: DepositStatus) -> bool {
        use DepositStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Error) => true,
            (Queued, Initialized) | (Queued, Finalized) => true,
            (Initialized, Finalized) => true,
            (Finalized, AwaitingAttestation) => true,
            (AwaitingAttestation, Finalized) => true,
            (AwaitingAttestation, Bridged) => true,
            (Finalized, Bridged) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepositStatus::Queued => "Queued",
            DepositStatus::Initialized => "Initialized",
            DepositStatus::Finalized => "Finalized",
            DepositStatus::AwaitingAttestation => "AwaitingAttestation",
            DepositStatus::Bridged => "Bridged",
            DepositStatus::Error => "Error",
        };
        write!(f, "{s}")
    }
}

/// The Bitcoin funding transaction split the way the L1 depositor contract
/// consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingTransaction {
    #[serde(with = "serde_utils::hex_array")]
    pub version: [u8; 4],
    #[serde(with = "serde_utils::bytes")]
    pub input_vector: Bytes,
    #[serde(with = "serde_utils::bytes")]
    pub output_vector: Bytes,
    #[serde(with = "serde_utils::hex_array")]
    pub locktime: [u8; 4],
}

struct ByteReader<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(raw: &'a [u8]) -> Self {
        ByteReader { raw, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RevealParseError> {
        let end = self.pos.checked_add(n).ok_or(RevealParseError::Truncated)?;
        let slice = self.raw.get(self.pos..end).ok_or(RevealParseError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64, RevealParseError> {
        let first = self.take(1)?[0];
        Ok(match first {
            0xfd => u16::from_le_bytes(self.take(2)?.try_into().unwrap_or_default()) as u64,
            0xfe => u32::from_le_bytes(self.take(4)?.try_into().unwrap_or_default()) as u64,
            0xff => u64::from_le_bytes(self.take(8)?.try_into().unwrap_or_default()),
            n => n as u64,
        })
    }
}

impl FundingTransaction {
    /// Splits a raw (non-witness) Bitcoin transaction into the four pieces
    /// the L1 depositor contract consumes. The input and output vectors keep
    /// their varint count prefixes.
    pub fn parse(raw: &[u8]) -> Result<Self, RevealParseError> {
        let mut reader = ByteReader::new(raw);
        let version: [u8; 4] = reader
            .take(4)?
            .try_into()
            .map_err(|_| RevealParseError::Truncated)?;

        // Witness serialization carries a 0x00 marker where the input count
        // would be; the depositor contract expects the legacy form.
        if raw.get(4) == Some(&0x00) {
            return Err(RevealParseError::WitnessSerialization);
        }

        let inputs_start = reader.pos;
        let input_count = reader.varint()?;
        for _ in 0..input_count {
            reader.take(36)?; // outpoint
            let script_len = reader.varint()?;
            reader.take(script_len as usize)?;
            reader.take(4)?; // sequence
        }
        let input_vector = Bytes::copy_from_slice(&raw[inputs_start..reader.pos]);

        let outputs_start = reader.pos;
        let output_count = reader.varint()?;
        for _ in 0..output_count {
            reader.take(8)?; // value
            let script_len = reader.varint()?;
            reader.take(script_len as usize)?;
        }
        let output_vector = Bytes::copy_from_slice(&raw[outputs_start..reader.pos]);

        let locktime: [u8; 4] = reader
            .take(4)?
            .try_into()
            .map_err(|_| RevealParseError::Truncated)?;

        if reader.pos != raw.len() {
            return Err(RevealParseError::TrailingBytes {
                extra: raw.len() - reader.pos,
            });
        }

        Ok(FundingTransaction {
            version,
            input_vector,
            output_vector,
            locktime,
        })
    }

    /// Bitcoin txid of the funding transaction: double sha256 over the
    /// serialized transaction, kept in internal byte order.
    pub fn tx_hash(&self) -> H256 {
        let mut raw =
            Vec::with_capacity(8 + self.input_vector.len() + self.output_vector.len());
        raw.extend_from_slice(&self.version);
        raw.extend_from_slice(&self.input_vector);
        raw.extend_from_slice(&self.output_vector);
        raw.extend_from_slice(&self.locktime);

        let first = Sha256::digest(&raw);
        let second = Sha256::digest(first);
        H256::from_slice(&second)
    }
}

/// The Bitcoin reveal payload proving deposit intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReveal {
    pub funding_output_index: u32,
    #[serde(with = "serde_utils::hex_array")]
    pub blinding_factor: [u8; 8],
    #[serde(with = "serde_utils::hex_array")]
    pub wallet_pub_key_hash: [u8; 20],
    #[serde(with = "serde_utils::hex_array")]
    pub refund_pub_key_hash: [u8; 20],
    #[serde(with = "serde_utils::hex_array")]
    pub refund_locktime: [u8; 4],
    pub vault: Address,
}

/// Byte length of the Sui on-chain reveal payload.
pub const SUI_REVEAL_LEN: usize = 56;

impl DepositReveal {
    /// Parses the 56-byte Sui reveal layout:
    /// be_u32 output index ‖ 8-byte blinding factor ‖ 20-byte wallet PKH ‖
    /// 20-byte refund PKH ‖ 4-byte refund locktime. Sui events carry no
    /// vault field, so the configured vault address is injected here.
    pub fn from_sui_bytes(raw: &[u8], vault: Address) -> Result<Self, RevealParseError> {
        if raw.len() != SUI_REVEAL_LEN {
            return Err(RevealParseError::BadLength {
                expected: SUI_REVEAL_LEN,
                got: raw.len(),
            });
        }

        let mut index = [0u8; 4];
        index.copy_from_slice(&raw[0..4]);
        let mut blinding_factor = [0u8; 8];
        blinding_factor.copy_from_slice(&raw[4..12]);
        let mut wallet_pub_key_hash = [0u8; 20];
        wallet_pub_key_hash.copy_from_slice(&raw[12..32]);
        let mut refund_pub_key_hash = [0u8; 20];
        refund_pub_key_hash.copy_from_slice(&raw[32..52]);
        let mut refund_locktime = [0u8; 4];
        refund_locktime.copy_from_slice(&raw[52..56]);

        Ok(DepositReveal {
            funding_output_index: u32::from_be_bytes(index),
            blinding_factor,
            wallet_pub_key_hash,
            refund_pub_key_hash,
            refund_locktime,
            vault,
        })
    }
}

/// Everything needed to call `initializeDeposit` on L1.
///
/// `l2_deposit_owner` and `l2_sender` are 32-byte destination-chain
/// identities: left-padded EVM addresses, or native 32-byte Solana/Sui
/// addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1OutputEvent {
    pub funding_tx: FundingTransaction,
    pub reveal: DepositReveal,
    pub l2_deposit_owner: H256,
    pub l2_sender: H256,
}

pub fn evm_address_to_owner(address: Address) -> H256 {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_bytes());
    H256(out)
}

/// Transaction hashes recorded per lifecycle step. Destination-chain hashes
/// are kept as strings since Solana signatures and Sui digests are not
/// 32-byte values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositHashes {
    pub btc_funding_tx: Option<H256>,
    pub l1_initialize_tx: Option<H256>,
    pub l1_finalize_tx: Option<H256>,
    pub l2_bridge_tx: Option<String>,
}

/// Filled once finalization parses the L1 receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationInfo {
    pub transfer_sequence: u64,
    pub l1_tx_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositDates {
    pub created_at: DateTime<Utc>,
    pub initialized_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub bridged_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl DepositDates {
    fn new(now: DateTime<Utc>) -> Self {
        DepositDates {
            created_at: now,
            initialized_at: None,
            finalized_at: None,
            bridged_at: None,
            last_activity_at: None,
        }
    }
}

/// A durable deposit lifecycle record. Owned by exactly one chain handler
/// for its entire lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub chain_name: String,
    pub status: DepositStatus,
    pub l1_output_event: L1OutputEvent,
    pub hashes: DepositHashes,
    pub attestation_info: Option<AttestationInfo>,
    pub dates: DepositDates,
    pub last_error: Option<String>,
}

impl Deposit {
    pub fn new(chain_name: impl Into<String>, l1_output_event: L1OutputEvent) -> Self {
        let funding_tx_hash = l1_output_event.funding_tx.tx_hash();
        let id = DepositId::from_funding_outpoint(
            funding_tx_hash,
            l1_output_event.reveal.funding_output_index,
        );
        let mut hashes = DepositHashes::default();
        hashes.btc_funding_tx = Some(funding_tx_hash);

        Deposit {
            id,
            chain_name: chain_name.into(),
            status: DepositStatus::Queued,
            l1_output_event,
            hashes,
            attestation_info: None,
            dates: DepositDates::new(Utc::now()),
            last_error: None,
        }
    }

    /// Moves the record to `next`, enforcing transition legality and
    /// stamping the per-status date. Dates only ever move forward.
    pub fn set_status(&mut self, next: DepositStatus) -> Result<(), StateTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StateTransitionError::Illegal {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            DepositStatus::Initialized if self.dates.initialized_at.is_none() => {
                self.dates.initialized_at = Some(now);
            }
            DepositStatus::Finalized if self.dates.finalized_at.is_none() => {
                self.dates.finalized_at = Some(now);
            }
            DepositStatus::Bridged if self.dates.bridged_at.is_none() => {
                self.dates.bridged_at = Some(now);
            }
            _ => {}
        }
        self.status = next;
        self.mark_activity();
        Ok(())
    }

    /// Bumps `last_activity_at`, never moving it backwards.
    pub fn mark_activity(&mut self) {
        let now = Utc::now();
        match self.dates.last_activity_at {
            Some(prev) if prev > now => {}
            _ => self.dates.last_activity_at = Some(now),
        }
    }

    pub fn record_error(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.mark_activity();
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Whether a batch pass should pick this record up, given the retry
    /// pacing interval. Records with no activity yet are always due.
    pub fn is_due(&self, retry_interval: chrono::Duration) -> bool {
        match self.dates.last_activity_at {
            None => true,
            Some(last) => Utc::now() - last >= retry_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn funding_tx() -> FundingTransaction {
        FundingTransaction {
            version: hex!("02000000"),
            input_vector: Bytes::from_static(&hex!(
                "01c0ffee0000000000000000000000000000000000000000000000000000000000000000ffffffff00ffffffff"
            )),
            output_vector: Bytes::from_static(&hex!(
                "0150c3000000000000160014deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
            )),
            locktime: hex!("00000000"),
        }
    }

    fn reveal(index: u32) -> DepositReveal {
        DepositReveal {
            funding_output_index: index,
            blinding_factor: hex!("f9f0c90d00039523"),
            wallet_pub_key_hash: hex!("8db50eb52063ea9d98b3eac91489a90f738986f6"),
            refund_pub_key_hash: hex!("28e081f285138ccbe389c1eb8985716230129f89"),
            refund_locktime: hex!("60bcea61"),
            vault: Address::from_low_u64_be(7),
        }
    }

    #[test]
    fn deposit_key_is_deterministic() {
        let tx_hash = H256::from_slice(&hex!(
            "c0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ff"
        ));
        let a = deposit_key(tx_hash, 0);
        let b = deposit_key(tx_hash, 0);
        assert_eq!(a, b);
        assert_ne!(a, deposit_key(tx_hash, 1));
    }

    #[test]
    fn deposit_id_matches_funding_outpoint() {
        let event = L1OutputEvent {
            funding_tx: funding_tx(),
            reveal: reveal(3),
            l2_deposit_owner: H256::from_low_u64_be(1),
            l2_sender: H256::from_low_u64_be(2),
        };
        let deposit = Deposit::new("BaseSepolia", event.clone());
        let expected =
            DepositId::from_funding_outpoint(event.funding_tx.tx_hash(), 3);
        assert_eq!(deposit.id, expected);
        assert_eq!(deposit.hashes.btc_funding_tx, Some(event.funding_tx.tx_hash()));

        // Same outpoint, same id, byte for byte.
        let again = Deposit::new("BaseSepolia", event);
        assert_eq!(deposit.id.to_hex(), again.id.to_hex());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use DepositStatus::*;
        assert!(Queued.can_transition_to(Initialized));
        assert!(Initialized.can_transition_to(Finalized));
        assert!(Finalized.can_transition_to(AwaitingAttestation));
        assert!(AwaitingAttestation.can_transition_to(Bridged));
        // recovery pair
        assert!(AwaitingAttestation.can_transition_to(Finalized));
        // forbidden backward moves
        assert!(!Finalized.can_transition_to(Initialized));
        assert!(!Initialized.can_transition_to(Queued));
        assert!(!Bridged.can_transition_to(Finalized));
        // error sink from anywhere
        assert!(Bridged.can_transition_to(Error));
    }

    #[test]
    fn set_status_rejects_backward_moves() {
        let event = L1OutputEvent {
            funding_tx: funding_tx(),
            reveal: reveal(0),
            l2_deposit_owner: H256::zero(),
            l2_sender: H256::zero(),
        };
        let mut deposit = Deposit::new("Arbitrum", event);
        deposit.set_status(DepositStatus::Initialized).unwrap();
        deposit.set_status(DepositStatus::Finalized).unwrap();
        assert!(deposit.set_status(DepositStatus::Initialized).is_err());
        assert_eq!(deposit.status, DepositStatus::Finalized);
    }

    #[test]
    fn sui_reveal_parse() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&5u32.to_be_bytes());
        raw.extend_from_slice(&hex!("f9f0c90d00039523"));
        raw.extend_from_slice(&hex!("8db50eb52063ea9d98b3eac91489a90f738986f6"));
        raw.extend_from_slice(&hex!("28e081f285138ccbe389c1eb8985716230129f89"));
        raw.extend_from_slice(&hex!("60bcea61"));

        let vault = Address::from_low_u64_be(0xabc);
        let parsed = DepositReveal::from_sui_bytes(&raw, vault).unwrap();
        assert_eq!(parsed.funding_output_index, 5);
        assert_eq!(parsed.vault, vault);
        assert_eq!(parsed.blinding_factor, hex!("f9f0c90d00039523"));
        assert_eq!(parsed.refund_locktime, hex!("60bcea61"));

        assert!(DepositReveal::from_sui_bytes(&raw[..55], vault).is_err());
    }

    #[test]
    fn raw_transaction_split_round_trips() {
        let tx = funding_tx();
        let mut raw = Vec::new();
        raw.extend_from_slice(&tx.version);
        raw.extend_from_slice(&tx.input_vector);
        raw.extend_from_slice(&tx.output_vector);
        raw.extend_from_slice(&tx.locktime);

        let parsed = FundingTransaction::parse(&raw).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(parsed.tx_hash(), tx.tx_hash());

        assert!(matches!(
            FundingTransaction::parse(&raw[..10]),
            Err(RevealParseError::Truncated)
        ));

        let mut trailing = raw.clone();
        trailing.push(0xFF);
        assert!(matches!(
            FundingTransaction::parse(&trailing),
            Err(RevealParseError::TrailingBytes { extra: 1 })
        ));

        // witness marker right after the version
        let mut witness = raw.clone();
        witness[4] = 0x00;
        assert!(matches!(
            FundingTransaction::parse(&witness),
            Err(RevealParseError::WitnessSerialization)
        ));
    }

    #[test]
    fn evm_owner_is_left_padded() {
        let address = Address::from_slice(&hex!("abcdabcdabcdabcdabcdabcdabcdabcdabcdabcd"));
        let owner = evm_address_to_owner(address);
        assert_eq!(&owner.as_bytes()[..12], &[0u8; 12]);
        assert_eq!(&owner.as_bytes()[12..], address.as_bytes());
    }
}
