use std::sync::Arc;

use ethereum_types::H256;
use tbtc_relay_common::types::{Deposit, DepositId, DepositStatus, Redemption, RedemptionStatus};
use tracing::info;

use crate::api::StoreEngine;
use crate::error::StoreError;
use crate::store_db::in_memory::Store as InMemoryStore;

/// Handle to the durable deposit/redemption repository. Cheap to clone;
/// every clone talks to the same engine.
#[derive(Debug, Clone)]
pub struct Store {
    engine: Arc<dyn StoreEngine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    InMemory,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            engine: Arc::new(InMemoryStore::new()),
        }
    }
}

impl Store {
    pub fn new(engine_type: EngineType) -> Self {
        info!("Starting relayer storage engine ({engine_type:?})");
        match engine_type {
            EngineType::InMemory => Self {
                engine: Arc::new(InMemoryStore::new()),
            },
        }
    }

    /// Wraps an externally provided engine (e.g. a SQL driver living outside
    /// this workspace).
    pub fn with_engine(engine: Arc<dyn StoreEngine>) -> Self {
        Store { engine }
    }

    pub async fn create_deposit(&self, deposit: Deposit) -> Result<(), StoreError> {
        self.engine.create_deposit(deposit).await
    }

    pub async fn get_deposit(&self, id: DepositId) -> Result<Option<Deposit>, StoreError> {
        self.engine.get_deposit(id).await
    }

    /// Like `get_deposit` but failing with `NotFound` on a missing id.
    pub async fn require_deposit(&self, id: DepositId) -> Result<Deposit, StoreError> {
        self.engine
            .get_deposit(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_hex()))
    }

    pub async fn get_deposits_by_status(
        &self,
        status: DepositStatus,
        chain_name: &str,
    ) -> Result<Vec<Deposit>, StoreError> {
        self.engine.get_deposits_by_status(status, chain_name).await
    }

    pub async fn update_deposit(&self, deposit: Deposit) -> Result<(), StoreError> {
        self.engine.update_deposit(deposit).await
    }

    pub async fn create_redemption(&self, redemption: Redemption) -> Result<(), StoreError> {
        self.engine.create_redemption(redemption).await
    }

    pub async fn get_redemption(&self, id: H256) -> Result<Option<Redemption>, StoreError> {
        self.engine.get_redemption(id).await
    }

    pub async fn get_redemptions_by_status(
        &self,
        status: RedemptionStatus,
        chain_name: &str,
    ) -> Result<Vec<Redemption>, StoreError> {
        self.engine
            .get_redemptions_by_status(status, chain_name)
            .await
    }

    pub async fn update_redemption(&self, redemption: Redemption) -> Result<(), StoreError> {
        self.engine.update_redemption(redemption).await
    }
}
