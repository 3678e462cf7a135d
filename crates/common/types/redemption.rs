use crate::serde_utils;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a redemption. Pending → VaaFetched → Completed,
/// with VaaFailed and Failed as sinks that only operator action re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedemptionStatus {
    Pending,
    VaaFetched,
    VaaFailed,
    Completed,
    Failed,
}

impl RedemptionStatus {
    pub fn can_transition_to(self, next: RedemptionStatus) -> bool {
        use RedemptionStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Pending, VaaFetched) | (Pending, VaaFailed) => true,
            (VaaFailed, VaaFetched) => true,
            (VaaFetched, Completed) | (VaaFetched, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedemptionStatus::Pending => "Pending",
            RedemptionStatus::VaaFetched => "VaaFetched",
            RedemptionStatus::VaaFailed => "VaaFailed",
            RedemptionStatus::Completed => "Completed",
            RedemptionStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// The wallet main UTXO referenced by a redemption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainUtxo {
    pub tx_hash: H256,
    pub output_index: u32,
    pub value: u64,
}

/// The `RedemptionRequested` event payload as emitted by the L2 redeemer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    #[serde(with = "serde_utils::hex_array")]
    pub wallet_pub_key_hash: [u8; 20],
    pub main_utxo: MainUtxo,
    #[serde(with = "serde_utils::bytes")]
    pub redeemer_output_script: Bytes,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionDates {
    pub created_at: DateTime<Utc>,
    pub vaa_fetched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// A durable redemption record, keyed by the L2 transaction hash of the
/// redemption request (unique per request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: H256,
    pub chain_name: String,
    pub event: RedemptionEvent,
    pub status: RedemptionStatus,
    #[serde(default, with = "serde_utils::bytes_opt")]
    pub vaa: Option<Bytes>,
    pub l1_submission_tx_hash: Option<H256>,
    pub dates: RedemptionDates,
    pub logs: Vec<String>,
}

impl Redemption {
    pub fn new(id: H256, chain_name: impl Into<String>, event: RedemptionEvent) -> Self {
        Redemption {
            id,
            chain_name: chain_name.into(),
            event,
            status: RedemptionStatus::Pending,
            vaa: None,
            l1_submission_tx_hash: None,
            dates: RedemptionDates {
                created_at: Utc::now(),
                vaa_fetched_at: None,
                completed_at: None,
                last_activity_at: None,
            },
            logs: Vec::new(),
        }
    }

    pub fn set_status(
        &mut self,
        next: RedemptionStatus,
    ) -> Result<(), crate::errors::StateTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::errors::StateTransitionError::Illegal {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            RedemptionStatus::VaaFetched if self.dates.vaa_fetched_at.is_none() => {
                self.dates.vaa_fetched_at = Some(now);
            }
            RedemptionStatus::Completed if self.dates.completed_at.is_none() => {
                self.dates.completed_at = Some(now);
            }
            _ => {}
        }
        self.status = next;
        self.mark_activity();
        Ok(())
    }

    pub fn mark_activity(&mut self) {
        let now = Utc::now();
        match self.dates.last_activity_at {
            Some(prev) if prev > now => {}
            _ => self.dates.last_activity_at = Some(now),
        }
    }

    /// Whether a batch pass should pick this record up, given the retry
    /// pacing interval.
    pub fn is_due(&self, retry_interval: chrono::Duration) -> bool {
        match self.dates.last_activity_at {
            None => true,
            Some(last) => Utc::now() - last >= retry_interval,
        }
    }

    /// Appends to the record's append-only text trail.
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(format!("{}: {}", Utc::now().to_rfc3339(), line.into()));
    }
}
