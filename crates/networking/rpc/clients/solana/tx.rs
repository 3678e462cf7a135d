use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
pub const SYSVAR_RENT_ID: &str = "SysvarRent111111111111111111111111111111111";

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

#[derive(Debug, Error)]
pub enum SolanaTxError {
    #[error("invalid base58 pubkey: {0}")]
    BadPubkey(String),
    #[error("invalid keypair: {0}")]
    BadKeypair(String),
    #[error("no viable program-derived address bump for the given seeds")]
    NoViableBump,
    #[error("transaction references an unknown account")]
    UnknownAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub fn from_base58(raw: &str) -> Result<Self, SolanaTxError> {
        let decoded = bs58::decode(raw)
            .into_vec()
            .map_err(|e| SolanaTxError::BadPubkey(e.to_string()))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| SolanaTxError::BadPubkey(format!("wrong length for {raw}")))?;
        Ok(Pubkey(bytes))
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Whether the bytes decode as a point on the ed25519 curve. Off-curve
    /// is what makes an address program-derived.
    pub fn is_on_curve(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }

    pub fn create_program_address(
        seeds: &[&[u8]],
        bump: u8,
        program_id: &Pubkey,
    ) -> Result<Pubkey, SolanaTxError> {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update([bump]);
        hasher.update(program_id.0);
        hasher.update(PDA_MARKER);
        let candidate = Pubkey(hasher.finalize().into());
        if candidate.is_on_curve() {
            return Err(SolanaTxError::NoViableBump);
        }
        Ok(candidate)
    }

    /// Standard descending-bump PDA search.
    pub fn find_program_address(
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), SolanaTxError> {
        for bump in (0..=255u8).rev() {
            if let Ok(address) = Self::create_program_address(seeds, bump, program_id) {
                return Ok((address, bump));
            }
        }
        Err(SolanaTxError::NoViableBump)
    }

    /// The associated token account of `wallet` for `mint`.
    pub fn associated_token_address(
        wallet: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Pubkey, SolanaTxError> {
        let token_program = Pubkey::from_base58(TOKEN_PROGRAM_ID)?;
        let ata_program = Pubkey::from_base58(ASSOCIATED_TOKEN_PROGRAM_ID)?;
        let (address, _) = Pubkey::find_program_address(
            &[&wallet.0, &token_program.0, &mint.0],
            &ata_program,
        )?;
        Ok(address)
    }
}

impl std::fmt::Display for Pubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// An ed25519 signing identity, imported from the base58 64-byte keypair
/// export format.
pub struct Keypair {
    signing_key: SigningKey,
    pubkey: Pubkey,
}

impl Keypair {
    pub fn from_base58(raw: &str) -> Result<Self, SolanaTxError> {
        let decoded = bs58::decode(raw)
            .into_vec()
            .map_err(|e| SolanaTxError::BadKeypair(e.to_string()))?;
        if decoded.len() != 64 {
            return Err(SolanaTxError::BadKeypair(format!(
                "expected 64 bytes, got {}",
                decoded.len()
            )));
        }
        let secret: [u8; 32] = decoded[..32]
            .try_into()
            .map_err(|_| SolanaTxError::BadKeypair("truncated secret".to_string()))?;
        let signing_key = SigningKey::from_bytes(&secret);
        let pubkey = Pubkey(signing_key.verifying_key().to_bytes());

        // The export format carries the public half too; reject corrupted
        // keypairs where the halves disagree.
        if decoded[32..] != pubkey.0 {
            return Err(SolanaTxError::BadKeypair(
                "public key does not match secret".to_string(),
            ));
        }
        Ok(Keypair {
            signing_key,
            pubkey,
        })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair").field("pubkey", &self.pubkey).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        AccountMeta {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        AccountMeta {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// compact-u16 length prefix used throughout the wire format.
pub fn encode_shortvec_len(len: usize, out: &mut Vec<u8>) {
    let mut rem = len as u16;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            break;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

#[derive(Debug, Clone)]
struct CompiledInstruction {
    program_id_index: u8,
    account_indexes: Vec<u8>,
    data: Vec<u8>,
}

/// A legacy (non-versioned) message.
#[derive(Debug, Clone)]
pub struct Message {
    num_required_signatures: u8,
    num_readonly_signed: u8,
    num_readonly_unsigned: u8,
    account_keys: Vec<Pubkey>,
    recent_blockhash: [u8; 32],
    instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Compiles instructions against a fee payer: accounts are deduplicated
    /// with signer/writable flags merged, then laid out in the canonical
    /// writable-signers, readonly-signers, writable, readonly order.
    pub fn new(
        instructions: &[Instruction],
        payer: Pubkey,
        recent_blockhash: [u8; 32],
    ) -> Result<Message, SolanaTxError> {
        let mut metas: Vec<AccountMeta> = vec![AccountMeta::new(payer, true)];
        for instruction in instructions {
            for meta in &instruction.accounts {
                match metas.iter_mut().find(|m| m.pubkey == meta.pubkey) {
                    Some(existing) => {
                        existing.is_signer |= meta.is_signer;
                        existing.is_writable |= meta.is_writable;
                    }
                    None => metas.push(meta.clone()),
                }
            }
            if !metas.iter().any(|m| m.pubkey == instruction.program_id) {
                metas.push(AccountMeta::new_readonly(instruction.program_id, false));
            }
        }

        let mut writable_signers: Vec<&AccountMeta> = Vec::new();
        let mut readonly_signers: Vec<&AccountMeta> = Vec::new();
        let mut writable: Vec<&AccountMeta> = Vec::new();
        let mut readonly: Vec<&AccountMeta> = Vec::new();
        for meta in &metas {
            match (meta.is_signer, meta.is_writable) {
                (true, true) => writable_signers.push(meta),
                (true, false) => readonly_signers.push(meta),
                (false, true) => writable.push(meta),
                (false, false) => readonly.push(meta),
            }
        }

        let num_required_signatures = (writable_signers.len() + readonly_signers.len()) as u8;
        let num_readonly_signed = readonly_signers.len() as u8;
        let num_readonly_unsigned = readonly.len() as u8;

        let account_keys: Vec<Pubkey> = writable_signers
            .iter()
            .chain(readonly_signers.iter())
            .chain(writable.iter())
            .chain(readonly.iter())
            .map(|m| m.pubkey)
            .collect();

        let index_of = |pubkey: &Pubkey| -> Result<u8, SolanaTxError> {
            account_keys
                .iter()
                .position(|k| k == pubkey)
                .map(|i| i as u8)
                .ok_or(SolanaTxError::UnknownAccount)
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            let account_indexes = instruction
                .accounts
                .iter()
                .map(|m| index_of(&m.pubkey))
                .collect::<Result<Vec<_>, _>>()?;
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&instruction.program_id)?,
                account_indexes,
                data: instruction.data.clone(),
            });
        }

        Ok(Message {
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.num_required_signatures);
        out.push(self.num_readonly_signed);
        out.push(self.num_readonly_unsigned);
        encode_shortvec_len(self.account_keys.len(), &mut out);
        for key in &self.account_keys {
            out.extend_from_slice(&key.0);
        }
        out.extend_from_slice(&self.recent_blockhash);
        encode_shortvec_len(self.instructions.len(), &mut out);
        for instruction in &self.instructions {
            out.push(instruction.program_id_index);
            encode_shortvec_len(instruction.account_indexes.len(), &mut out);
            out.extend_from_slice(&instruction.account_indexes);
            encode_shortvec_len(instruction.data.len(), &mut out);
            out.extend_from_slice(&instruction.data);
        }
        out
    }
}

/// A signed transaction ready for `sendTransaction`.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub signatures: Vec<[u8; 64]>,
    pub message: Message,
}

impl Transaction {
    /// Single-signer signing path: the relayer's keypair is always the one
    /// fee payer.
    pub fn new_signed(
        instructions: &[Instruction],
        payer: &Keypair,
        recent_blockhash: [u8; 32],
    ) -> Result<Transaction, SolanaTxError> {
        let message = Message::new(instructions, payer.pubkey(), recent_blockhash)?;
        let signature = payer.sign(&message.serialize());
        Ok(Transaction {
            signatures: vec![signature],
            message,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_shortvec_len(self.signatures.len(), &mut out);
        for signature in &self.signatures {
            out.extend_from_slice(signature);
        }
        out.extend_from_slice(&self.message.serialize());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> Keypair {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let mut raw = signing_key.to_bytes().to_vec();
        raw.extend_from_slice(&signing_key.verifying_key().to_bytes());
        Keypair::from_base58(&bs58::encode(raw).into_string()).unwrap()
    }

    #[test]
    fn shortvec_encoding() {
        let mut out = Vec::new();
        encode_shortvec_len(0, &mut out);
        assert_eq!(out, vec![0x00]);

        let mut out = Vec::new();
        encode_shortvec_len(5, &mut out);
        assert_eq!(out, vec![0x05]);

        let mut out = Vec::new();
        encode_shortvec_len(0x7f, &mut out);
        assert_eq!(out, vec![0x7f]);

        let mut out = Vec::new();
        encode_shortvec_len(0x80, &mut out);
        assert_eq!(out, vec![0x80, 0x01]);

        let mut out = Vec::new();
        encode_shortvec_len(0x3fff, &mut out);
        assert_eq!(out, vec![0xff, 0x7f]);
    }

    #[test]
    fn pda_derivation_is_off_curve_and_stable() {
        let program = Pubkey::from_base58(TOKEN_PROGRAM_ID).unwrap();
        let (a, bump_a) = Pubkey::find_program_address(&[b"PostedVAA", &[9u8; 32]], &program).unwrap();
        let (b, bump_b) = Pubkey::find_program_address(&[b"PostedVAA", &[9u8; 32]], &program).unwrap();
        assert_eq!(a, b);
        assert_eq!(bump_a, bump_b);
        assert!(!a.is_on_curve());
    }

    #[test]
    fn keypair_round_trip_and_mismatch() {
        let keypair = test_keypair();
        assert!(keypair.pubkey().is_on_curve());

        // corrupt the public half
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let mut raw = signing_key.to_bytes().to_vec();
        raw.extend_from_slice(&[0u8; 32]);
        assert!(Keypair::from_base58(&bs58::encode(raw).into_string()).is_err());
    }

    #[test]
    fn message_layout_orders_accounts() {
        let payer = test_keypair();
        let program = Pubkey::from_base58(SYSTEM_PROGRAM_ID).unwrap();
        let writable_account = Pubkey([1u8; 32]);
        let readonly_account = Pubkey([2u8; 32]);
        let instruction = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(writable_account, false),
                AccountMeta::new_readonly(readonly_account, false),
            ],
            data: vec![0xAB],
        };

        let message =
            Message::new(&[instruction], payer.pubkey(), [3u8; 32]).unwrap();
        assert_eq!(message.num_required_signatures, 1);
        assert_eq!(message.num_readonly_signed, 0);
        // readonly account + program id
        assert_eq!(message.num_readonly_unsigned, 2);
        assert_eq!(message.account_keys[0], payer.pubkey());
        assert_eq!(message.account_keys[1], writable_account);

        let serialized = message.serialize();
        assert_eq!(serialized[0], 1);
        // 4 accounts follow the 3-byte header and their shortvec length
        assert_eq!(serialized[3], 4);
    }

    #[test]
    fn signed_transaction_has_one_signature() {
        let payer = test_keypair();
        let program = Pubkey::from_base58(SYSTEM_PROGRAM_ID).unwrap();
        let instruction = Instruction {
            program_id: program,
            accounts: vec![AccountMeta::new(Pubkey([4u8; 32]), false)],
            data: vec![1, 2, 3],
        };
        let tx = Transaction::new_signed(&[instruction], &payer, [9u8; 32]).unwrap();
        assert_eq!(tx.signatures.len(), 1);
        let raw = tx.serialize();
        assert_eq!(raw[0], 1);
        assert_eq!(raw.len(), 1 + 64 + tx.message.serialize().len());
    }
}
