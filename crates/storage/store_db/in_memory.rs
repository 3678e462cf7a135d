use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard},
};

use ethereum_types::H256;
use tbtc_relay_common::types::{Deposit, DepositId, DepositStatus, Redemption, RedemptionStatus};

use crate::api::StoreEngine;
use crate::error::StoreError;

/// In-memory engine. Serializes every mutation on one lock, so per-id update
/// atomicity holds trivially. Durability here means "until process exit";
/// production deployments plug a real driver into `StoreEngine`.
#[derive(Default, Clone)]
pub struct Store(Arc<Mutex<StoreInner>>);

#[derive(Default, Debug)]
struct StoreInner {
    deposits: HashMap<DepositId, Deposit>,
    redemptions: HashMap<H256, Redemption>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.0
            .lock()
            .map_err(|_| StoreError::Custom("Failed to lock the store".to_string()))
    }
}

#[async_trait::async_trait]
impl StoreEngine for Store {
    async fn create_deposit(&self, deposit: Deposit) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        if inner.deposits.contains_key(&deposit.id) {
            return Err(StoreError::AlreadyExists(deposit.id.to_hex()));
        }
        inner.deposits.insert(deposit.id, deposit);
        Ok(())
    }

    async fn get_deposit(&self, id: DepositId) -> Result<Option<Deposit>, StoreError> {
        Ok(self.inner()?.deposits.get(&id).cloned())
    }

    async fn get_deposits_by_status(
        &self,
        status: DepositStatus,
        chain_name: &str,
    ) -> Result<Vec<Deposit>, StoreError> {
        Ok(self
            .inner()?
            .deposits
            .values()
            .filter(|d| d.status == status && d.chain_name == chain_name)
            .cloned()
            .collect())
    }

    async fn update_deposit(&self, deposit: Deposit) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        let existing = inner
            .deposits
            .get(&deposit.id)
            .ok_or_else(|| StoreError::NotFound(deposit.id.to_hex()))?;
        // Optimistic concurrency: a writer that lost the race carries an
        // older last_activity_at than the stored record.
        if let (Some(new), Some(old)) = (
            deposit.dates.last_activity_at,
            existing.dates.last_activity_at,
        ) {
            if new < old {
                return Err(StoreError::StaleUpdate(deposit.id.to_hex()));
            }
        }
        inner.deposits.insert(deposit.id, deposit);
        Ok(())
    }

    async fn create_redemption(&self, redemption: Redemption) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        if inner.redemptions.contains_key(&redemption.id) {
            return Err(StoreError::AlreadyExists(format!("{:#x}", redemption.id)));
        }
        inner.redemptions.insert(redemption.id, redemption);
        Ok(())
    }

    async fn get_redemption(&self, id: H256) -> Result<Option<Redemption>, StoreError> {
        Ok(self.inner()?.redemptions.get(&id).cloned())
    }

    async fn get_redemptions_by_status(
        &self,
        status: RedemptionStatus,
        chain_name: &str,
    ) -> Result<Vec<Redemption>, StoreError> {
        Ok(self
            .inner()?
            .redemptions
            .values()
            .filter(|r| r.status == status && r.chain_name == chain_name)
            .cloned()
            .collect())
    }

    async fn update_redemption(&self, redemption: Redemption) -> Result<(), StoreError> {
        let mut inner = self.inner()?;
        let existing = inner
            .redemptions
            .get(&redemption.id)
            .ok_or_else(|| StoreError::NotFound(format!("{:#x}", redemption.id)))?;
        if let (Some(new), Some(old)) = (
            redemption.dates.last_activity_at,
            existing.dates.last_activity_at,
        ) {
            if new < old {
                return Err(StoreError::StaleUpdate(format!("{:#x}", redemption.id)));
            }
        }
        inner.redemptions.insert(redemption.id, redemption);
        Ok(())
    }
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("In Memory Relayer Store").finish()
    }
}
