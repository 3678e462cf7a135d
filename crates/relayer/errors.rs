use tbtc_relay_common::{RevealParseError, StateTransitionError};
use tbtc_relay_rpc::calldata::CalldataEncodeError;
use tbtc_relay_rpc::clients::attestation::AttestationError;
use tbtc_relay_rpc::clients::eth::errors::EthClientError;
use tbtc_relay_rpc::clients::solana::SolanaClientError;
use tbtc_relay_rpc::clients::solana::tx::SolanaTxError;
use tbtc_relay_rpc::clients::sui::SuiClientError;
use tbtc_relay_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum L1Error {
    #[error("L1 client error: {0}")]
    EthClientError(#[from] EthClientError),
    #[error("failed to encode calldata: {0}")]
    CalldataEncodeError(#[from] CalldataEncodeError),
    /// The pre-flight static call reverted; no transaction was sent.
    #[error("pre-flight revert: {reason}")]
    PreflightRevert { reason: String },
    /// The transaction was mined with status 0.
    #[error("transaction {tx_hash:#x} reverted on chain")]
    Reverted { tx_hash: ethereum_types::H256 },
    #[error("insufficient funds for L1 transaction: {0}")]
    InsufficientFunds(String),
    #[error("unexpected on-chain deposit state value {0}")]
    UnknownDepositState(u8),
    #[error("{0}")]
    Custom(String),
}

impl L1Error {
    /// Transient errors resolve on a later tick without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            L1Error::EthClientError(_) | L1Error::InsufficientFunds(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed on an L1 operation: {0}")]
    L1(#[from] L1Error),
    #[error("handler failed to access the store: {0}")]
    Store(#[from] StoreError),
    #[error("handler failed on an L2 RPC call: {0}")]
    EthClientError(#[from] EthClientError),
    #[error("handler failed on a Solana call: {0}")]
    SolanaClientError(#[from] SolanaClientError),
    #[error("handler failed building a Solana transaction: {0}")]
    SolanaTxError(#[from] SolanaTxError),
    #[error("handler failed on a Sui call: {0}")]
    SuiClientError(#[from] SuiClientError),
    #[error("handler failed to deserialize an event: {0}")]
    FailedToDeserializeEvent(String),
    #[error("handler rejected a malformed reveal: {0}")]
    Reveal(#[from] RevealParseError),
    #[error("illegal lifecycle transition: {0}")]
    StateTransition(#[from] StateTransitionError),
    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RedemptionError {
    #[error("redemption pass failed to access the store: {0}")]
    Store(#[from] StoreError),
    #[error("redemption pass failed on an L2 RPC call: {0}")]
    EthClientError(#[from] EthClientError),
    #[error("attestation fetch failed: {0}")]
    Attestation(#[from] AttestationError),
    #[error("no attestation sequence found for L2 transaction {0:#x}")]
    SequenceNotFound(ethereum_types::H256),
    #[error("redemption L1 submission failed: {0}")]
    L1(#[from] L1Error),
    #[error("illegal lifecycle transition: {0}")]
    StateTransition(#[from] StateTransitionError),
    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("reveal intake is disabled for chain {0}")]
    EndpointDisabled(String),
    #[error("reveal rejected: {0}")]
    Reveal(#[from] RevealParseError),
    #[error("reveal rejected: vault {got} does not match the configured vault {expected}")]
    VaultMismatch { expected: String, got: String },
    #[error("failed to persist deposit: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to start handler {chain}: {source}")]
    HandlerStartup {
        chain: String,
        #[source]
        source: HandlerError,
    },
    #[error("audit sink failed: {0}")]
    Audit(#[from] std::io::Error),
}
