pub mod attestation;
pub mod eth;
pub mod solana;
pub mod sui;

pub use attestation::AttestationClient;
pub use eth::{EthClient, Overrides, errors as eth_errors};
pub use solana::SolanaRpcClient;
pub use sui::SuiRpcClient;
