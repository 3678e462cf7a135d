//! Outbound chain clients for the relayer.
//!
//! Every client here is a hand-rolled JSON-RPC (or plain HTTP) client over
//! reqwest with typed request/response envelopes:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`clients::eth`] | Ethereum-class JSON-RPC client with multi-URL failover |
//! | [`clients::solana`] | Solana JSON-RPC client plus a compact transaction layer |
//! | [`clients::sui`] | Sui JSON-RPC client with event-cursor paging |
//! | [`clients::attestation`] | Cross-chain attestation (VAA) fetch client |
//! | [`signer`] | EIP-1559 signing and the per-signer managed nonce counter |
//! | [`calldata`] | Solidity ABI calldata encoding and return-word decoding |

pub mod calldata;
pub mod clients;
pub mod rpc_types;
pub mod signer;

pub use clients::attestation::{AttestationClient, VaaFetchOutcome};
pub use clients::eth::{EthClient, Overrides};
pub use clients::solana::SolanaRpcClient;
pub use clients::sui::SuiRpcClient;
pub use signer::Signer;
