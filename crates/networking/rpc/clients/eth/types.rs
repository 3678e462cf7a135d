use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Deserializer, de::Error};
use serde_json::{Value, json};
use tbtc_relay_rlp::encode::RLPEncode;
use tbtc_relay_rlp::structs::Encoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Earliest,
    Finalized,
    Safe,
    Latest,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdentifier {
    Number(u64),
    Tag(BlockTag),
}

impl From<BlockIdentifier> for Value {
    fn from(value: BlockIdentifier) -> Self {
        match value {
            BlockIdentifier::Number(n) => json!(format!("{n:#x}")),
            BlockIdentifier::Tag(BlockTag::Earliest) => json!("earliest"),
            BlockIdentifier::Tag(BlockTag::Finalized) => json!("finalized"),
            BlockIdentifier::Tag(BlockTag::Safe) => json!("safe"),
            BlockIdentifier::Tag(BlockTag::Latest) => json!("latest"),
            BlockIdentifier::Tag(BlockTag::Pending) => json!("pending"),
        }
    }
}

fn deser_hex_u64<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(d)?;
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| D::Error::custom(format!("invalid hex quantity: {e}")))
}

fn deser_hex_bytes<'de, D>(d: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(d)?;
    hex::decode(value.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| D::Error::custom(format!("invalid hex data: {e}")))
}

/// One log entry as returned by `eth_getLogs` / carried in a receipt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(deserialize_with = "deser_hex_bytes")]
    pub data: Bytes,
    #[serde(deserialize_with = "deser_hex_u64")]
    pub block_number: u64,
    pub transaction_hash: H256,
    #[serde(default, deserialize_with = "deser_hex_u64_opt")]
    pub log_index: Option<u64>,
}

fn deser_hex_u64_opt<'de, D>(d: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(d)?;
    match value {
        None => Ok(None),
        Some(s) => u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid hex quantity: {e}"))),
    }
}

/// A mined transaction receipt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: H256,
    #[serde(deserialize_with = "deser_hex_u64")]
    pub block_number: u64,
    #[serde(deserialize_with = "deser_hex_u64")]
    pub status: u64,
    #[serde(deserialize_with = "deser_hex_u64")]
    pub gas_used: u64,
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// A block header slice sufficient for timestamp binary search.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(deserialize_with = "deser_hex_u64")]
    pub number: u64,
    #[serde(deserialize_with = "deser_hex_u64")]
    pub timestamp: u64,
}

/// An EIP-1559 transaction ready for signing.
#[derive(Debug, Clone)]
pub struct EIP1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

pub const EIP1559_TX_TYPE: u8 = 0x02;

impl EIP1559Transaction {
    /// The bytes whose keccak digest gets signed:
    /// `0x02 ‖ rlp([chainId, nonce, maxPriorityFee, maxFee, gas, to, value,
    /// data, accessList])`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = vec![EIP1559_TX_TYPE];
        Encoder::new(&mut payload)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_bytes(&self.data)
            .encode_field(&Vec::<(Address, Vec<H256>)>::new())
            .finish();
        payload
    }

    /// The raw broadcastable transaction with the signature appended.
    pub fn raw_with_signature(&self, y_parity: bool, r: U256, s: U256) -> Vec<u8> {
        let mut raw = vec![EIP1559_TX_TYPE];
        Encoder::new(&mut raw)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_bytes(&self.data)
            .encode_field(&Vec::<(Address, Vec<H256>)>::new())
            .encode_field(&y_parity)
            .encode_field(&r)
            .encode_field(&s)
            .finish();
        raw
    }
}

// RLPEncode is implemented via Encoder above; this keeps callers that want
// the unsigned body as a plain field working.
impl RLPEncode for EIP1559Transaction {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_bytes(&self.data)
            .encode_field(&Vec::<(Address, Vec<H256>)>::new())
            .finish();
    }
}
