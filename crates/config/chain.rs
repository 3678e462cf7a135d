use ethereum_types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use secp256k1::SecretKey;
use serde::Deserialize;
use std::str::FromStr;
use tbtc_relay_common::types::{ChainType, Network, SolanaCommitment};
use url::Url;

lazy_static! {
    static ref EVM_ADDRESS_RE: Regex =
        Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex");
    static ref EVM_PRIVATE_KEY_RE: Regex =
        Regex::new(r"^(0x)?[0-9a-fA-F]{64}$").expect("static regex");
    static ref STARKNET_PRIVATE_KEY_RE: Regex =
        Regex::new(r"^0x[0-9a-fA-F]{1,64}$").expect("static regex");
    static ref SUI_OBJECT_ID_RE: Regex =
        Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("static regex");
}

/// Fields shared by every chain family.
#[derive(Debug, Clone)]
pub struct CommonChainConfig {
    pub chain_name: String,
    pub network: Network,
    pub l1_rpc: Url,
    pub l2_rpc: Url,
    pub l2_ws_rpc: Option<Url>,
    pub l1_bitcoin_depositor_address: Address,
    pub l2_bitcoin_depositor_address: String,
    /// Required when the redemption pipeline is enabled for this chain.
    pub l2_bitcoin_redeemer_address: Option<String>,
    pub vault_address: Address,
    pub l2_wormhole_gateway_address: String,
    pub l2_wormhole_chain_id: u16,
    pub l1_confirmations: u64,
    pub l2_start_block: u64,
    pub use_endpoint: bool,
    pub enable_l2_redemption: bool,
    pub supports_reveal_deposit_api: bool,
}

#[derive(Debug, Clone)]
pub struct EvmChainConfig {
    pub common: CommonChainConfig,
    pub private_key: SecretKey,
}

#[derive(Debug, Clone)]
pub struct SolanaChainConfig {
    pub common: CommonChainConfig,
    /// Key paying for this chain's L1 transactions.
    pub l1_private_key: SecretKey,
    /// base58-encoded 64-byte keypair.
    pub solana_private_key: String,
    pub solana_commitment: SolanaCommitment,
}

/// Shared-object ids referenced by the Sui bridging transaction.
#[derive(Debug, Clone)]
pub struct SuiSharedObjects {
    pub receiver_state_id: String,
    pub gateway_state_id: String,
    pub capabilities_id: String,
    pub treasury_id: String,
    pub wormhole_core_id: String,
    pub token_bridge_id: String,
    pub token_state_id: String,
}

#[derive(Debug, Clone)]
pub struct SuiChainConfig {
    pub common: CommonChainConfig,
    /// Key paying for this chain's L1 transactions.
    pub l1_private_key: SecretKey,
    /// base64 keypair export or Bech32 `suiprivkey` string.
    pub sui_private_key: String,
    pub shared_objects: SuiSharedObjects,
    pub wrapped_tbtc_type: String,
    pub sui_gas_object_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StarknetChainConfig {
    pub common: CommonChainConfig,
    /// Key paying for this chain's L1 transactions.
    pub l1_private_key: SecretKey,
    pub starknet_private_key: String,
    /// Fee in wei sent as msg.value with `finalizeDeposit`; overridden by
    /// the live `quoteFinalizeDeposit` result when that is non-zero.
    pub l1_fee_amount_wei: u128,
}

/// Validated, typed per-chain configuration.
#[derive(Debug, Clone)]
pub enum ChainConfig {
    Evm(EvmChainConfig),
    Solana(SolanaChainConfig),
    Sui(SuiChainConfig),
    Starknet(StarknetChainConfig),
}

impl ChainConfig {
    pub fn common(&self) -> &CommonChainConfig {
        match self {
            ChainConfig::Evm(c) => &c.common,
            ChainConfig::Solana(c) => &c.common,
            ChainConfig::Sui(c) => &c.common,
            ChainConfig::Starknet(c) => &c.common,
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.common().chain_name
    }

    pub fn chain_type(&self) -> ChainType {
        match self {
            ChainConfig::Evm(_) => ChainType::Evm,
            ChainConfig::Solana(_) => ChainType::Solana,
            ChainConfig::Sui(_) => ChainType::Sui,
            ChainConfig::Starknet(_) => ChainType::Starknet,
        }
    }
}

/// Untyped view of one chain's environment, as read by envy with the
/// `TBTC_<CHAIN>_` prefix. Everything is optional here; `validate` turns it
/// into a `ChainConfig` or a list of diagnostics.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawChainConfig {
    pub chain_type: Option<String>,
    pub network: Option<String>,
    pub l1_rpc: Option<String>,
    pub l2_rpc: Option<String>,
    pub l2_ws_rpc: Option<String>,
    pub l1_bitcoin_depositor_address: Option<String>,
    pub l2_bitcoin_depositor_address: Option<String>,
    pub l2_bitcoin_redeemer_address: Option<String>,
    pub vault_address: Option<String>,
    pub l2_wormhole_gateway_address: Option<String>,
    pub l2_wormhole_chain_id: Option<u16>,
    pub l1_confirmations: Option<u64>,
    pub l2_start_block: Option<u64>,
    pub use_endpoint: Option<bool>,
    pub enable_l2_redemption: Option<bool>,
    pub supports_reveal_deposit_api: Option<bool>,

    // EVM
    pub private_key: Option<String>,
    // Solana
    pub solana_private_key: Option<String>,
    pub solana_commitment: Option<String>,
    // Sui
    pub sui_private_key: Option<String>,
    pub receiver_state_id: Option<String>,
    pub gateway_state_id: Option<String>,
    pub capabilities_id: Option<String>,
    pub treasury_id: Option<String>,
    pub wormhole_core_id: Option<String>,
    pub token_bridge_id: Option<String>,
    pub token_state_id: Option<String>,
    pub wrapped_tbtc_type: Option<String>,
    pub sui_gas_object_id: Option<String>,
    // Starknet
    pub starknet_private_key: Option<String>,
    pub l1_fee_amount_wei: Option<String>,
}

struct Check<'a> {
    chain: &'a str,
    errors: Vec<String>,
}

impl<'a> Check<'a> {
    fn new(chain: &'a str) -> Self {
        Check {
            chain,
            errors: Vec::new(),
        }
    }

    fn push(&mut self, message: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", self.chain, message));
    }

    fn required<T: Clone>(&mut self, value: &Option<T>, name: &str) -> Option<T> {
        match value {
            Some(v) => Some(v.clone()),
            None => {
                self.push(format!("missing required option {name}"));
                None
            }
        }
    }

    fn url(&mut self, value: &Option<String>, name: &str) -> Option<Url> {
        let raw = self.required(value, name)?;
        match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                self.push(format!("{name} is not a valid URL: {e}"));
                None
            }
        }
    }

    fn evm_address(&mut self, value: &Option<String>, name: &str) -> Option<Address> {
        let raw = self.required(value, name)?;
        if !EVM_ADDRESS_RE.is_match(&raw) {
            self.push(format!("{name} is not a valid EVM address"));
            return None;
        }
        Address::from_str(&raw).ok()
    }
}

fn parse_evm_key(check: &mut Check<'_>, value: &Option<String>, name: &str) -> Option<SecretKey> {
    let raw = check.required(value, name)?;
    if !EVM_PRIVATE_KEY_RE.is_match(&raw) {
        check.push(format!("{name} is not a 32-byte hex key"));
        return None;
    }
    match SecretKey::from_str(raw.trim_start_matches("0x")) {
        Ok(key) => Some(key),
        Err(e) => {
            check.push(format!("{name} rejected: {e}"));
            None
        }
    }
}

fn validate_solana_keypair(raw: &str) -> Result<(), String> {
    let decoded = bs58::decode(raw)
        .into_vec()
        .map_err(|e| format!("not base58: {e}"))?;
    if decoded.len() != 64 {
        return Err(format!("expected 64-byte keypair, got {}", decoded.len()));
    }
    Ok(())
}

fn validate_sui_key(raw: &str) -> Result<(), String> {
    use base64::Engine as _;
    if raw.starts_with("suiprivkey") {
        let (hrp, _, _) = bech32::decode(raw).map_err(|e| format!("not bech32: {e}"))?;
        if hrp != "suiprivkey" {
            return Err(format!("unexpected bech32 prefix {hrp}"));
        }
        return Ok(());
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| format!("not base64: {e}"))?;
    // flag byte + 32-byte secret
    if decoded.len() != 33 && decoded.len() != 32 {
        return Err(format!("expected 32 or 33 bytes, got {}", decoded.len()));
    }
    Ok(())
}

impl RawChainConfig {
    /// Turns the raw environment view into a typed `ChainConfig`, or every
    /// diagnostic that prevents it.
    pub fn validate(&self, chain_name: &str) -> Result<ChainConfig, Vec<String>> {
        let mut check = Check::new(chain_name);

        let chain_type = match self
            .chain_type
            .as_deref()
            .map(ChainType::from_str)
            .transpose()
        {
            Ok(t) => t,
            Err(e) => {
                check.push(e);
                None
            }
        };
        if chain_type.is_none() && self.chain_type.is_none() {
            check.push("missing required option CHAIN_TYPE");
        }

        let network = match self.network.as_deref().map(Network::from_str).transpose() {
            Ok(n) => n.unwrap_or(Network::Testnet),
            Err(e) => {
                check.push(e);
                Network::Testnet
            }
        };

        let l1_rpc = check.url(&self.l1_rpc, "L1_RPC");
        let l2_rpc = check.url(&self.l2_rpc, "L2_RPC");
        let l2_ws_rpc = match &self.l2_ws_rpc {
            None => None,
            Some(raw) => match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    check.push(format!("L2_WS_RPC is not a valid URL: {e}"));
                    None
                }
            },
        };
        let l1_bitcoin_depositor_address =
            check.evm_address(&self.l1_bitcoin_depositor_address, "L1_BITCOIN_DEPOSITOR_ADDRESS");
        let vault_address = check.evm_address(&self.vault_address, "VAULT_ADDRESS");
        let l2_bitcoin_depositor_address =
            check.required(&self.l2_bitcoin_depositor_address, "L2_BITCOIN_DEPOSITOR_ADDRESS");
        let l2_wormhole_gateway_address =
            check.required(&self.l2_wormhole_gateway_address, "L2_WORMHOLE_GATEWAY_ADDRESS");
        let l2_wormhole_chain_id =
            check.required(&self.l2_wormhole_chain_id, "L2_WORMHOLE_CHAIN_ID");

        let l1_confirmations = self.l1_confirmations.unwrap_or(1);
        if l1_confirmations == 0 {
            check.push("L1_CONFIRMATIONS must be a positive integer");
        }

        let enable_l2_redemption = self.enable_l2_redemption.unwrap_or(false);
        if enable_l2_redemption && self.l2_bitcoin_redeemer_address.is_none() {
            check.push("ENABLE_L2_REDEMPTION requires L2_BITCOIN_REDEEMER_ADDRESS");
        }

        let common = (|| {
            Some(CommonChainConfig {
                chain_name: chain_name.to_string(),
                network,
                l1_rpc: l1_rpc?,
                l2_rpc: l2_rpc?,
                l2_ws_rpc,
                l1_bitcoin_depositor_address: l1_bitcoin_depositor_address?,
                l2_bitcoin_depositor_address: l2_bitcoin_depositor_address?,
                l2_bitcoin_redeemer_address: self.l2_bitcoin_redeemer_address.clone(),
                vault_address: vault_address?,
                l2_wormhole_gateway_address: l2_wormhole_gateway_address?,
                l2_wormhole_chain_id: l2_wormhole_chain_id?,
                l1_confirmations,
                l2_start_block: self.l2_start_block.unwrap_or(0),
                use_endpoint: self.use_endpoint.unwrap_or(false),
                enable_l2_redemption,
                supports_reveal_deposit_api: self.supports_reveal_deposit_api.unwrap_or(false),
            })
        })();

        let config = match chain_type {
            Some(ChainType::Evm) => {
                let key = parse_evm_key(&mut check, &self.private_key, "PRIVATE_KEY");
                match (common, key) {
                    (Some(common), Some(private_key)) => Some(ChainConfig::Evm(EvmChainConfig {
                        common,
                        private_key,
                    })),
                    _ => None,
                }
            }
            Some(ChainType::Solana) => {
                let l1_key = parse_evm_key(&mut check, &self.private_key, "PRIVATE_KEY");
                let key = check
                    .required(&self.solana_private_key, "SOLANA_PRIVATE_KEY")
                    .and_then(|raw| match validate_solana_keypair(&raw) {
                        Ok(()) => Some(raw),
                        Err(e) => {
                            check.push(format!("SOLANA_PRIVATE_KEY rejected: {e}"));
                            None
                        }
                    });
                let commitment = match self
                    .solana_commitment
                    .as_deref()
                    .map(SolanaCommitment::from_str)
                    .transpose()
                {
                    Ok(c) => c.unwrap_or(SolanaCommitment::Confirmed),
                    Err(e) => {
                        check.push(e);
                        SolanaCommitment::Confirmed
                    }
                };
                match (common, l1_key, key) {
                    (Some(common), Some(l1_private_key), Some(solana_private_key)) => {
                        Some(ChainConfig::Solana(SolanaChainConfig {
                            common,
                            l1_private_key,
                            solana_private_key,
                            solana_commitment: commitment,
                        }))
                    }
                    _ => None,
                }
            }
            Some(ChainType::Sui) => {
                let l1_key = parse_evm_key(&mut check, &self.private_key, "PRIVATE_KEY");
                let key = check
                    .required(&self.sui_private_key, "SUI_PRIVATE_KEY")
                    .and_then(|raw| match validate_sui_key(&raw) {
                        Ok(()) => Some(raw),
                        Err(e) => {
                            check.push(format!("SUI_PRIVATE_KEY rejected: {e}"));
                            None
                        }
                    });

                let mut object_id = |value: &Option<String>, name: &str| -> Option<String> {
                    let raw = check.required(value, name)?;
                    if !SUI_OBJECT_ID_RE.is_match(&raw) {
                        check.push(format!("{name} is not a 32-byte object id"));
                        return None;
                    }
                    Some(raw)
                };
                let receiver_state_id = object_id(&self.receiver_state_id, "RECEIVER_STATE_ID");
                let gateway_state_id = object_id(&self.gateway_state_id, "GATEWAY_STATE_ID");
                let capabilities_id = object_id(&self.capabilities_id, "CAPABILITIES_ID");
                let treasury_id = object_id(&self.treasury_id, "TREASURY_ID");
                let wormhole_core_id = object_id(&self.wormhole_core_id, "WORMHOLE_CORE_ID");
                let token_bridge_id = object_id(&self.token_bridge_id, "TOKEN_BRIDGE_ID");
                let token_state_id = object_id(&self.token_state_id, "TOKEN_STATE_ID");
                let wrapped_tbtc_type =
                    check.required(&self.wrapped_tbtc_type, "WRAPPED_TBTC_TYPE");

                let shared = (|| {
                    Some(SuiSharedObjects {
                        receiver_state_id: receiver_state_id?,
                        gateway_state_id: gateway_state_id?,
                        capabilities_id: capabilities_id?,
                        treasury_id: treasury_id?,
                        wormhole_core_id: wormhole_core_id?,
                        token_bridge_id: token_bridge_id?,
                        token_state_id: token_state_id?,
                    })
                })();

                match (common, l1_key, key, shared, wrapped_tbtc_type) {
                    (
                        Some(common),
                        Some(l1_private_key),
                        Some(sui_private_key),
                        Some(shared_objects),
                        Some(wrapped),
                    ) => Some(ChainConfig::Sui(SuiChainConfig {
                        common,
                        l1_private_key,
                        sui_private_key,
                        shared_objects,
                        wrapped_tbtc_type: wrapped,
                        sui_gas_object_id: self.sui_gas_object_id.clone(),
                    })),
                    _ => None,
                }
            }
            Some(ChainType::Starknet) => {
                let l1_key = parse_evm_key(&mut check, &self.private_key, "PRIVATE_KEY");
                let key = check
                    .required(&self.starknet_private_key, "STARKNET_PRIVATE_KEY")
                    .and_then(|raw| {
                        if STARKNET_PRIVATE_KEY_RE.is_match(&raw) {
                            Some(raw)
                        } else {
                            check.push("STARKNET_PRIVATE_KEY is not a felt hex string");
                            None
                        }
                    });
                let fee = match self.l1_fee_amount_wei.as_deref().unwrap_or("0").parse::<u128>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        check.push(format!("L1_FEE_AMOUNT_WEI is not a decimal string: {e}"));
                        None
                    }
                };
                match (common, l1_key, key, fee) {
                    (
                        Some(common),
                        Some(l1_private_key),
                        Some(starknet_private_key),
                        Some(l1_fee_amount_wei),
                    ) => Some(ChainConfig::Starknet(StarknetChainConfig {
                        common,
                        l1_private_key,
                        starknet_private_key,
                        l1_fee_amount_wei,
                    })),
                    _ => None,
                }
            }
            None => None,
        };

        match config {
            Some(config) if check.errors.is_empty() => Ok(config),
            _ => Err(check.errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_evm() -> RawChainConfig {
        RawChainConfig {
            chain_type: Some("Evm".into()),
            network: Some("Testnet".into()),
            l1_rpc: Some("https://sepolia.example.org".into()),
            l2_rpc: Some("https://base-sepolia.example.org".into()),
            l1_bitcoin_depositor_address: Some(
                "0x49D1b98B0c8d3cEe5Af0fC8EE1c2F1c1C8CE1c11".into(),
            ),
            l2_bitcoin_depositor_address: Some(
                "0x27D1b98B0c8d3cEe5Af0fC8EE1c2F1c1C8CE1c22".into(),
            ),
            vault_address: Some("0x9C070027cdC9dc8F82416B2e5314E11DFb4FE3CD".into()),
            l2_wormhole_gateway_address: Some(
                "0x12D1b98B0c8d3cEe5Af0fC8EE1c2F1c1C8CE1c33".into(),
            ),
            l2_wormhole_chain_id: Some(30),
            private_key: Some(
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".into(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn evm_config_validates() {
        let config = raw_evm().validate("Base").expect("valid config");
        assert_eq!(config.chain_name(), "Base");
        assert_eq!(config.chain_type(), ChainType::Evm);
        assert_eq!(config.common().l1_confirmations, 1);
        assert!(!config.common().use_endpoint);
    }

    #[test]
    fn all_errors_are_collected() {
        let raw = RawChainConfig {
            chain_type: Some("Evm".into()),
            l1_rpc: Some("not a url".into()),
            l1_confirmations: Some(0),
            ..Default::default()
        };
        let errors = raw.validate("Broken").unwrap_err();
        // url + missing l2_rpc + missing addresses + missing key + confirmations
        assert!(errors.len() >= 5);
        assert!(errors.iter().all(|e| e.starts_with("Broken: ")));
        assert!(errors.iter().any(|e| e.contains("L1_CONFIRMATIONS")));
    }

    #[test]
    fn bad_private_key_is_rejected() {
        let mut raw = raw_evm();
        raw.private_key = Some("0x1234".into());
        let errors = raw.validate("Base").unwrap_err();
        assert!(errors.iter().any(|e| e.contains("PRIVATE_KEY")));
    }

    #[test]
    fn starknet_fee_defaults_to_zero() {
        let mut raw = raw_evm();
        raw.chain_type = Some("Starknet".into());
        raw.starknet_private_key = Some("0x1a2b3c".into());
        let config = raw.validate("Starknet").expect("valid config");
        match config {
            ChainConfig::Starknet(c) => assert_eq!(c.l1_fee_amount_wei, 0),
            other => panic!("unexpected variant {other:?}"),
        }
    }
}
