// Storage API for the relayer's lifecycle records.

use std::fmt::Debug;

use ethereum_types::H256;
use tbtc_relay_common::types::{Deposit, DepositId, DepositStatus, Redemption, RedemptionStatus};

use crate::error::StoreError;

// We need async_trait because the stabilized feature lacks support for object safety
// (i.e. dyn StoreEngine)
#[async_trait::async_trait]
pub trait StoreEngine: Debug + Send + Sync {
    /// Inserts a new deposit record. Fails with `AlreadyExists` on id collision.
    async fn create_deposit(&self, deposit: Deposit) -> Result<(), StoreError>;

    /// Returns the deposit with the given id, if any.
    async fn get_deposit(&self, id: DepositId) -> Result<Option<Deposit>, StoreError>;

    /// Snapshot of deposits in `status` owned by `chain_name`. Order is
    /// unspecified.
    async fn get_deposits_by_status(
        &self,
        status: DepositStatus,
        chain_name: &str,
    ) -> Result<Vec<Deposit>, StoreError>;

    /// Replaces an existing deposit record atomically. Fails with `NotFound`
    /// if the id is unknown.
    async fn update_deposit(&self, deposit: Deposit) -> Result<(), StoreError>;

    /// Inserts a new redemption record. Fails with `AlreadyExists` on id
    /// collision.
    async fn create_redemption(&self, redemption: Redemption) -> Result<(), StoreError>;

    /// Returns the redemption with the given id, if any.
    async fn get_redemption(&self, id: H256) -> Result<Option<Redemption>, StoreError>;

    /// Snapshot of redemptions in `status` owned by `chain_name`.
    async fn get_redemptions_by_status(
        &self,
        status: RedemptionStatus,
        chain_name: &str,
    ) -> Result<Vec<Redemption>, StoreError>;

    /// Replaces an existing redemption record atomically. Fails with
    /// `NotFound` if the id is unknown.
    async fn update_redemption(&self, redemption: Redemption) -> Result<(), StoreError>;
}
