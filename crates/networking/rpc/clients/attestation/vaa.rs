use keccak_hash::keccak;
use ethereum_types::H256;
use thiserror::Error;

const SIGNATURE_LEN: usize = 66;
const BODY_HEADER_LEN: usize = 51;

#[derive(Debug, Error)]
pub enum VaaError {
    #[error("VAA envelope truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unsupported VAA version {0}")]
    UnsupportedVersion(u8),
    #[error("emitter chain mismatch: expected {expected}, got {got}")]
    EmitterChainMismatch { expected: u16, got: u16 },
    #[error("emitter address mismatch: expected {expected}, got {got}")]
    EmitterAddressMismatch { expected: String, got: String },
}

/// A decoded attestation envelope. The signed `payload` stays opaque; this
/// type only exposes what the relayer verifies and routes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vaa {
    pub version: u8,
    pub guardian_set_index: u32,
    pub signature_count: u8,
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
    body: Vec<u8>,
}

impl Vaa {
    pub fn parse(raw: &[u8]) -> Result<Vaa, VaaError> {
        let need = |needed: usize, got: usize| -> Result<(), VaaError> {
            if got < needed {
                Err(VaaError::Truncated { needed, got })
            } else {
                Ok(())
            }
        };

        need(6, raw.len())?;
        let version = raw[0];
        if version != 1 {
            return Err(VaaError::UnsupportedVersion(version));
        }
        let guardian_set_index = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let signature_count = raw[5];

        let body_start = 6 + signature_count as usize * SIGNATURE_LEN;
        need(body_start + BODY_HEADER_LEN, raw.len())?;
        let body = &raw[body_start..];

        let timestamp = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let nonce = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
        let emitter_chain = u16::from_be_bytes([body[8], body[9]]);
        let mut emitter_address = [0u8; 32];
        emitter_address.copy_from_slice(&body[10..42]);
        let sequence = u64::from_be_bytes([
            body[42], body[43], body[44], body[45], body[46], body[47], body[48], body[49],
        ]);
        let consistency_level = body[50];
        let payload = body[BODY_HEADER_LEN..].to_vec();

        Ok(Vaa {
            version,
            guardian_set_index,
            signature_count,
            timestamp,
            nonce,
            emitter_chain,
            emitter_address,
            sequence,
            consistency_level,
            payload,
            body: body.to_vec(),
        })
    }

    /// Checks the envelope was emitted by the expected source.
    pub fn verify_emitter(
        &self,
        emitter_chain: u16,
        emitter_address: &[u8; 32],
    ) -> Result<(), VaaError> {
        if self.emitter_chain != emitter_chain {
            return Err(VaaError::EmitterChainMismatch {
                expected: emitter_chain,
                got: self.emitter_chain,
            });
        }
        if &self.emitter_address != emitter_address {
            return Err(VaaError::EmitterAddressMismatch {
                expected: hex::encode(emitter_address),
                got: hex::encode(self.emitter_address),
            });
        }
        Ok(())
    }

    /// keccak digest of the signed body; the key under which destination
    /// chains index a posted attestation.
    pub fn digest(&self) -> H256 {
        keccak(&self.body)
    }
}

#[cfg(test)]
pub(crate) fn build_test_vaa(
    emitter_chain: u16,
    emitter_address: [u8; 32],
    sequence: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.push(1u8); // version
    raw.extend_from_slice(&3u32.to_be_bytes()); // guardian set
    raw.push(1u8); // one signature
    raw.extend_from_slice(&[0u8; SIGNATURE_LEN]);
    raw.extend_from_slice(&1_700_000_000u32.to_be_bytes()); // timestamp
    raw.extend_from_slice(&7u32.to_be_bytes()); // nonce
    raw.extend_from_slice(&emitter_chain.to_be_bytes());
    raw.extend_from_slice(&emitter_address);
    raw.extend_from_slice(&sequence.to_be_bytes());
    raw.push(32u8); // consistency level
    raw.extend_from_slice(payload);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_envelope_fields() {
        let emitter = [0xAB; 32];
        let raw = build_test_vaa(2, emitter, 42, b"tbtc-transfer");
        let vaa = Vaa::parse(&raw).unwrap();
        assert_eq!(vaa.version, 1);
        assert_eq!(vaa.guardian_set_index, 3);
        assert_eq!(vaa.signature_count, 1);
        assert_eq!(vaa.emitter_chain, 2);
        assert_eq!(vaa.emitter_address, emitter);
        assert_eq!(vaa.sequence, 42);
        assert_eq!(vaa.payload, b"tbtc-transfer");
    }

    #[test]
    fn emitter_verification() {
        let emitter = [0x11; 32];
        let raw = build_test_vaa(21, emitter, 9, &[]);
        let vaa = Vaa::parse(&raw).unwrap();
        assert!(vaa.verify_emitter(21, &emitter).is_ok());
        assert!(matches!(
            vaa.verify_emitter(2, &emitter),
            Err(VaaError::EmitterChainMismatch { .. })
        ));
        assert!(matches!(
            vaa.verify_emitter(21, &[0x22; 32]),
            Err(VaaError::EmitterAddressMismatch { .. })
        ));
    }

    #[test]
    fn truncated_and_bad_version_are_rejected() {
        assert!(matches!(
            Vaa::parse(&[1, 0, 0]),
            Err(VaaError::Truncated { .. })
        ));
        let raw = build_test_vaa(2, [0u8; 32], 1, &[]);
        let mut bad = raw.clone();
        bad[0] = 2;
        assert!(matches!(
            Vaa::parse(&bad),
            Err(VaaError::UnsupportedVersion(2))
        ));
        // strip the body
        assert!(Vaa::parse(&raw[..10]).is_err());
    }

    #[test]
    fn digest_covers_the_body_only() {
        let emitter = [0x33; 32];
        let a = Vaa::parse(&build_test_vaa(2, emitter, 5, b"x")).unwrap();
        // different guardian set index, same body
        let mut raw = build_test_vaa(2, emitter, 5, b"x");
        raw[1..5].copy_from_slice(&9u32.to_be_bytes());
        let b = Vaa::parse(&raw).unwrap();
        assert_eq!(a.digest(), b.digest());
    }
}
