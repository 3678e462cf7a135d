use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tbtc_relay_common::types::{ChainType, DepositId};

use crate::errors::HandlerError;
use crate::l1::OnChainDepositState;

mod evm;
mod registry;
mod solana;
mod starknet;
mod sui;

pub use evm::EvmHandler;
pub use registry::HandlerRegistry;
pub use solana::SolanaHandler;
pub use starknet::StarknetHandler;
pub use sui::SuiHandler;

/// The capability set every destination chain implements. One live handler
/// exists per configured chain; it is the only mutator of that chain's
/// records.
#[async_trait]
pub trait ChainHandler: Send + Sync {
    fn chain_name(&self) -> &str;

    fn chain_type(&self) -> ChainType;

    /// One-time startup work: connectivity and balance checks.
    async fn initialize(&self) -> Result<(), HandlerError>;

    /// Runs the chain's live ingestion loop until `cancel` fires. Handlers
    /// without live subscriptions (endpoint mode, Solana) return
    /// immediately.
    async fn start_listening(&self, cancel: CancellationToken) -> Result<(), HandlerError>;

    /// Queued → Initialized batch pass. Returns how many records were
    /// picked up.
    async fn process_initialize_deposits(&self) -> Result<usize, HandlerError>;

    /// Initialized → Finalized batch pass.
    async fn process_finalize_deposits(&self) -> Result<usize, HandlerError>;

    /// AwaitingAttestation → Bridged batch pass.
    async fn process_bridge_deposits(&self) -> Result<usize, HandlerError>;

    /// The chain's current tip (the L1 tip for L1-driven handlers).
    async fn latest_block(&self) -> Result<u64, HandlerError>;

    fn supports_past_deposit_check(&self) -> bool;

    /// Replays events missed in the last `past_minutes`, up to
    /// `latest_block`.
    async fn check_for_past_deposits(
        &self,
        past_minutes: u64,
        latest_block: u64,
    ) -> Result<(), HandlerError>;

    /// On-chain deposit state, bypassing the local record.
    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<OnChainDepositState, HandlerError>;

    fn redemption_enabled(&self) -> bool {
        false
    }

    /// Pending/VaaFailed → VaaFetched redemption pass.
    async fn process_pending_redemptions(&self) -> Result<usize, HandlerError> {
        Ok(0)
    }

    /// VaaFetched → Completed redemption pass.
    async fn process_vaa_fetched_redemptions(&self) -> Result<usize, HandlerError> {
        Ok(0)
    }
}
