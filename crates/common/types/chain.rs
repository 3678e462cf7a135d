use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The family a destination chain belongs to. Decides which handler and
/// which key/address formats apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChainType {
    Evm,
    Solana,
    Sui,
    Starknet,
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainType::Evm => write!(f, "Evm"),
            ChainType::Solana => write!(f, "Solana"),
            ChainType::Sui => write!(f, "Sui"),
            ChainType::Starknet => write!(f, "Starknet"),
        }
    }
}

impl FromStr for ChainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Evm" | "EVM" | "evm" => Ok(ChainType::Evm),
            "Solana" | "solana" => Ok(ChainType::Solana),
            "Sui" | "sui" => Ok(ChainType::Sui),
            "Starknet" | "StarkNet" | "starknet" => Ok(ChainType::Starknet),
            other => Err(format!("unknown chain type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "Mainnet"),
            Network::Testnet => write!(f, "Testnet"),
            Network::Devnet => write!(f, "Devnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

impl Network {
    /// Wormhole chain id of the Ethereum L1 hub for this deployment.
    pub fn l1_wormhole_chain_id(&self) -> u16 {
        match self {
            Network::Testnet => WORMHOLE_CHAIN_ID_ETHEREUM_SEPOLIA,
            Network::Mainnet | Network::Devnet => WORMHOLE_CHAIN_ID_ETHEREUM,
        }
    }
}

/// Solana confirmation level used by the RPC client when reading accounts
/// and confirming transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolanaCommitment {
    Processed,
    Confirmed,
    Finalized,
}

impl SolanaCommitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolanaCommitment::Processed => "processed",
            SolanaCommitment::Confirmed => "confirmed",
            SolanaCommitment::Finalized => "finalized",
        }
    }
}

impl FromStr for SolanaCommitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(SolanaCommitment::Processed),
            "confirmed" => Ok(SolanaCommitment::Confirmed),
            "finalized" => Ok(SolanaCommitment::Finalized),
            other => Err(format!("unknown commitment level: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_type_parsing_accepts_common_spellings() {
        assert_eq!("EVM".parse::<ChainType>().unwrap(), ChainType::Evm);
        assert_eq!("StarkNet".parse::<ChainType>().unwrap(), ChainType::Starknet);
        assert!("Cosmos".parse::<ChainType>().is_err());
    }

    #[test]
    fn l1_wormhole_chain_id_follows_network() {
        assert_eq!(Network::Mainnet.l1_wormhole_chain_id(), 2);
        assert_eq!(Network::Testnet.l1_wormhole_chain_id(), 10002);
    }
}

/// Wormhole chain ids of the L1 hub deployments.
pub const WORMHOLE_CHAIN_ID_ETHEREUM: u16 = 2;
pub const WORMHOLE_CHAIN_ID_ETHEREUM_SEPOLIA: u16 = 10002;
