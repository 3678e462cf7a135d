// Keep H256, H160, Address from ethereum_types
pub use ethereum_types::{Address, H160, H256, U256};
pub mod serde_utils;
pub mod types;
pub use bytes::Bytes;
pub mod errors;

pub use errors::{RevealParseError, StateTransitionError};
