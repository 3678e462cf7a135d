use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use ethereum_types::Address;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod vaa;

pub use vaa::{Vaa, VaaError};

/// Poll pacing within one `fetch_vaa` invocation. The last entry repeats
/// once the schedule runs out.
const BACKOFF_SCHEDULE: [Duration; 6] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(300),
    Duration::from_secs(600),
    Duration::from_secs(1800),
];

/// Attempts per invocation; callers needing more budget re-invoke on later
/// orchestrator ticks.
const MAX_ATTEMPTS: usize = 10;

/// Concurrent polls allowed per (emitter chain, emitter address).
const POLLS_PER_EMITTER: usize = 2;

/// Default per-invocation deadline.
pub const VAA_POLL_TIMEOUT: Duration = Duration::from_secs(600);

pub fn backoff_delay(attempt: usize) -> Duration {
    *BACKOFF_SCHEDULE
        .get(attempt)
        .unwrap_or(&BACKOFF_SCHEDULE[BACKOFF_SCHEDULE.len() - 1])
}

/// Widens a 20-byte EVM address into the 32-byte emitter form.
pub fn emitter_address_from_evm(address: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_bytes());
    out
}

#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("attestation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("attestation response malformed: {0}")]
    Malformed(String),
    #[error("attestation poll cancelled")]
    Cancelled,
    #[error("attestation poll deadline exceeded")]
    DeadlineExceeded,
}

/// What one bounded polling invocation concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaaFetchOutcome {
    /// Signed attestation bytes, emitter-verified.
    Fetched(Bytes),
    /// The attestation network has not signed this message yet.
    NotReady,
    /// A non-recoverable response, or the retry budget ran dry on
    /// transient failures.
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct VaaResponse {
    data: VaaResponseData,
}

#[derive(Debug, Deserialize)]
struct VaaResponseData {
    vaa: String,
}

/// Client for the attestation network's REST API. Shared across handlers;
/// polls are rate-limited per emitter.
#[derive(Debug)]
pub struct AttestationClient {
    client: Client,
    base_url: Url,
    limiters: Mutex<HashMap<(u16, [u8; 32]), Arc<Semaphore>>>,
}

impl AttestationClient {
    pub fn new(base_url: Url) -> Result<Self, AttestationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(AttestationClient {
            client,
            base_url,
            limiters: Mutex::new(HashMap::new()),
        })
    }

    async fn limiter(&self, emitter_chain: u16, emitter_address: [u8; 32]) -> Arc<Semaphore> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry((emitter_chain, emitter_address))
            .or_insert_with(|| Arc::new(Semaphore::new(POLLS_PER_EMITTER)))
            .clone()
    }

    fn vaa_url(&self, emitter_chain: u16, emitter_address: &[u8; 32], sequence: u64) -> String {
        format!(
            "{}api/v1/vaas/{}/{}/{}",
            self.base_url,
            emitter_chain,
            hex::encode(emitter_address),
            sequence
        )
    }

    /// Polls for the signed attestation of (emitter chain, emitter address,
    /// sequence) until it is available, the attempt budget runs out, the
    /// deadline passes, or `cancel` fires.
    pub async fn fetch_vaa(
        &self,
        emitter_chain: u16,
        emitter_address: [u8; 32],
        sequence: u64,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<VaaFetchOutcome, AttestationError> {
        let limiter = self.limiter(emitter_chain, emitter_address).await;
        let _permit = tokio::select! {
            permit = limiter.acquire_owned() => permit
                .map_err(|_| AttestationError::Malformed("emitter limiter closed".to_string()))?,
            _ = cancel.cancelled() => return Err(AttestationError::Cancelled),
        };

        let poll = self.poll_until_signed(emitter_chain, emitter_address, sequence, cancel);
        match tokio::time::timeout(deadline, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AttestationError::DeadlineExceeded),
        }
    }

    async fn poll_until_signed(
        &self,
        emitter_chain: u16,
        emitter_address: [u8; 32],
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<VaaFetchOutcome, AttestationError> {
        let url = self.vaa_url(emitter_chain, &emitter_address, sequence);
        let mut last_transient: Option<String> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(AttestationError::Cancelled),
                }
            }

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%url, error = %e, "attestation request failed, will retry");
                    last_transient = Some(e.to_string());
                    continue;
                }
            };

            match response.status() {
                StatusCode::NOT_FOUND => {
                    debug!(sequence, attempt, "attestation not signed yet");
                    continue;
                }
                status if status.is_success() => {
                    let body: VaaResponse = response
                        .json()
                        .await
                        .map_err(|e| AttestationError::Malformed(e.to_string()))?;
                    let raw = BASE64
                        .decode(body.data.vaa.trim())
                        .map_err(|e| AttestationError::Malformed(e.to_string()))?;

                    let vaa = match Vaa::parse(&raw) {
                        Ok(vaa) => vaa,
                        Err(e) => return Ok(VaaFetchOutcome::Failed(e.to_string())),
                    };
                    if let Err(e) = vaa.verify_emitter(emitter_chain, &emitter_address) {
                        return Ok(VaaFetchOutcome::Failed(e.to_string()));
                    }
                    return Ok(VaaFetchOutcome::Fetched(Bytes::from(raw)));
                }
                status if status.is_client_error() => {
                    return Ok(VaaFetchOutcome::Failed(format!(
                        "attestation API rejected request: {status}"
                    )));
                }
                status => {
                    warn!(%url, %status, "transient attestation API failure");
                    last_transient = Some(format!("HTTP {status}"));
                    continue;
                }
            }
        }

        match last_transient {
            Some(reason) => Ok(VaaFetchOutcome::Failed(format!(
                "retry budget exhausted: {reason}"
            ))),
            None => Ok(VaaFetchOutcome::NotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_caps_at_thirty_minutes() {
        assert_eq!(backoff_delay(0), Duration::from_secs(30));
        assert_eq!(backoff_delay(1), Duration::from_secs(60));
        assert_eq!(backoff_delay(2), Duration::from_secs(120));
        assert_eq!(backoff_delay(3), Duration::from_secs(300));
        assert_eq!(backoff_delay(4), Duration::from_secs(600));
        assert_eq!(backoff_delay(5), Duration::from_secs(1800));
        assert_eq!(backoff_delay(6), Duration::from_secs(1800));
        assert_eq!(backoff_delay(100), Duration::from_secs(1800));
    }

    #[test]
    fn emitter_widening_left_pads() {
        let address = Address::from_low_u64_be(0x1234);
        let emitter = emitter_address_from_evm(address);
        assert_eq!(&emitter[..12], &[0u8; 12]);
        assert_eq!(&emitter[12..], address.as_bytes());
    }

    #[test]
    fn vaa_url_shape() {
        let client =
            AttestationClient::new(Url::parse("https://api.wormholescan.io/").unwrap()).unwrap();
        let url = client.vaa_url(2, &[0xAA; 32], 77);
        assert_eq!(
            url,
            format!(
                "https://api.wormholescan.io/api/v1/vaas/2/{}/77",
                "aa".repeat(32)
            )
        );
    }
}
