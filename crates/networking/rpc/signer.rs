use ethereum_types::{Address, U256};
use keccak_hash::keccak;
use secp256k1::{Message, PublicKey, SECP256K1, SecretKey};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::clients::eth::errors::EthClientError;
use crate::clients::eth::types::{BlockIdentifier, BlockTag, EIP1559Transaction};
use crate::clients::eth::EthClient;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// An L1 signing identity: one secp256k1 key plus the address derived from
/// it.
#[derive(Debug, Clone)]
pub struct Signer {
    secret_key: SecretKey,
    address: Address,
}

impl Signer {
    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let uncompressed = public_key.serialize_uncompressed();
        let digest = keccak(&uncompressed[1..]);
        let address = Address::from_slice(&digest.as_bytes()[12..]);
        Signer {
            secret_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs the transaction and returns the raw broadcastable bytes
    /// (`0x02 ‖ rlp([... , yParity, r, s])`).
    pub fn sign_eip1559(&self, tx: &EIP1559Transaction) -> Result<Vec<u8>, SignerError> {
        let payload = tx.signing_payload();
        let digest = keccak(&payload);
        let message = Message::from_digest(digest.0);
        let signature = SECP256K1.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let r = U256::from_big_endian(&compact[..32]);
        let s = U256::from_big_endian(&compact[32..]);
        let y_parity = recovery_id.to_i32() != 0;

        Ok(tx.raw_with_signature(y_parity, r, s))
    }
}

/// The managed nonce counter for one signer. Callers acquire nonces in lock
/// order, which makes the sequence handed out strictly monotonic.
#[derive(Debug, Default)]
pub struct NonceManager {
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counter at a known value instead of fetching on first
    /// use.
    pub fn with_initial(nonce: u64) -> Self {
        NonceManager {
            next: Mutex::new(Some(nonce)),
        }
    }

    /// Dispenses the next nonce, fetching the on-chain transaction count on
    /// first use.
    pub async fn next_nonce(
        &self,
        client: &EthClient,
        address: Address,
    ) -> Result<u64, EthClientError> {
        let mut guard = self.next.lock().await;
        let nonce = match *guard {
            Some(nonce) => nonce,
            None => {
                client
                    .get_nonce(address, BlockIdentifier::Tag(BlockTag::Latest))
                    .await?
            }
        };
        *guard = Some(nonce + 1);
        Ok(nonce)
    }

    /// Drops the cached counter so the next acquisition re-reads the chain.
    /// Called after a failed send, where the reserved nonce may or may not
    /// have been consumed.
    pub async fn reset(&self) {
        *self.next.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::str::FromStr;

    #[test]
    fn address_derivation_matches_known_vector() {
        // Private key 0x01 maps to a fixed, well-known address.
        let secret = SecretKey::from_str(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let signer = Signer::new(secret);
        assert_eq!(
            signer.address(),
            Address::from_str("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap()
        );
    }

    #[tokio::test]
    async fn concurrent_nonce_acquisition_is_strictly_monotonic() {
        use std::sync::Arc;

        // The cached counter means the client is never queried.
        let manager = Arc::new(NonceManager::with_initial(7));
        let client = Arc::new(EthClient::new("http://127.0.0.1:1").unwrap());
        let address = Address::from_low_u64_be(1);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                manager.next_nonce(&client, address).await.unwrap()
            }));
        }

        let mut nonces = Vec::new();
        for task in tasks {
            nonces.push(task.await.unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (7..23).collect::<Vec<u64>>());
    }

    #[test]
    fn signing_is_deterministic() {
        let secret = SecretKey::from_str(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let signer = Signer::new(secret);
        let tx = EIP1559Transaction {
            chain_id: 11155111,
            nonce: 3,
            max_priority_fee_per_gas: 1_000_000,
            max_fee_per_gas: 2_000_000,
            gas_limit: 120_000,
            to: Address::from_low_u64_be(0xabc),
            value: U256::zero(),
            data: Bytes::from_static(&[0x01, 0x02]),
        };
        let a = signer.sign_eip1559(&tx).unwrap();
        let b = signer.sign_eip1559(&tx).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], 0x02);
    }
}
