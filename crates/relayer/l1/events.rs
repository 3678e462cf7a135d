use ethereum_types::{H256, U256};
use lazy_static::lazy_static;
use tbtc_relay_rpc::calldata::decode_uint;
use tbtc_relay_rpc::clients::eth::event_topic;
use tbtc_relay_rpc::clients::eth::types::{RpcLog, RpcReceipt};

lazy_static! {
    static ref TOKENS_TRANSFERRED_TOPIC: H256 =
        event_topic("TokensTransferredWithPayload(uint256,bytes32,uint64)");
    static ref BRIDGED_TO_STARKNET_TOPIC: H256 =
        event_topic("TBTCBridgedToStarkNet(bytes32,uint256,uint256)");
}

/// Pulls the cross-chain transfer sequence out of a finalize receipt's
/// `TokensTransferredWithPayload(amount, receiver, transferSequence)` log.
/// Re-parsing the same receipt always re-derives the same sequence.
pub fn extract_transfer_sequence(receipt: &RpcReceipt) -> Option<u64> {
    receipt
        .logs
        .iter()
        .find(|log| log.topics.first() == Some(&TOKENS_TRANSFERRED_TOPIC))
        .and_then(|log| decode_uint(&log.data, 2).ok())
        .map(|sequence| sequence.low_u64())
}

/// A decoded `TBTCBridgedToStarkNet(depositKey, amount, starkNetRecipient)`
/// occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarknetBridgeEvent {
    pub deposit_key: U256,
    pub amount: U256,
    pub starknet_recipient: U256,
    pub l1_tx_hash: H256,
}

impl StarknetBridgeEvent {
    pub fn from_log(log: &RpcLog) -> Option<Self> {
        if log.topics.first() != Some(&BRIDGED_TO_STARKNET_TOPIC) {
            return None;
        }
        let deposit_key = U256::from_big_endian(log.topics.get(1)?.as_bytes());
        let amount = decode_uint(&log.data, 0).ok()?;
        let starknet_recipient = decode_uint(&log.data, 1).ok()?;
        Some(StarknetBridgeEvent {
            deposit_key,
            amount,
            starknet_recipient,
            l1_tx_hash: log.transaction_hash,
        })
    }
}
