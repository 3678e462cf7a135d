//! Process and per-chain configuration, sourced from the environment.
//!
//! Every option is read through envy with a `TBTC_` prefix: process-wide
//! options as `TBTC_<OPTION>`, per-chain options as `TBTC_<CHAIN>_<OPTION>`.
//! Validation never fails fast; all diagnostics are collected so startup can
//! abort with the complete list.

pub mod chain;
pub mod error;

pub use chain::{
    ChainConfig, CommonChainConfig, EvmChainConfig, RawChainConfig, SolanaChainConfig,
    StarknetChainConfig, SuiChainConfig, SuiSharedObjects,
};
pub use error::ConfigError;

use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Chains the relayer knows how to drive when `TBTC_SUPPORTED_CHAINS` is
/// left empty.
pub const KNOWN_CHAINS: &[&str] = &["Arbitrum", "Base", "Solana", "Sui", "Starknet"];

const DEFAULT_ATTESTATION_API: &str = "https://api.wormholescan.io";

/// Process-wide relayer options.
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub supported_chains: Vec<String>,
    pub initialize_interval: Duration,
    pub finalize_interval: Duration,
    pub bridge_interval: Duration,
    pub redemption_vaa_interval: Duration,
    pub redemption_submit_interval: Duration,
    pub past_scan_interval: Duration,
    /// Records touched within this window are skipped by batch passes.
    pub retry_interval: Duration,
    /// Upper bound on concurrent outbound pass executions.
    pub worker_pool_size: usize,
    pub attestation_api_url: Url,
    pub audit_log_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelayerConfig {
    supported_chains: Option<String>,
    initialize_interval_secs: Option<u64>,
    finalize_interval_secs: Option<u64>,
    bridge_interval_secs: Option<u64>,
    redemption_vaa_interval_secs: Option<u64>,
    redemption_submit_interval_secs: Option<u64>,
    past_scan_interval_secs: Option<u64>,
    retry_interval_secs: Option<u64>,
    worker_pool_size: Option<usize>,
    attestation_api_url: Option<String>,
    audit_log_path: Option<String>,
}

impl RawRelayerConfig {
    fn validate(&self) -> Result<RelayerConfig, Vec<String>> {
        let mut errors = Vec::new();

        let supported_chains = self
            .supported_chains
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let attestation_api_url = match Url::parse(
            self.attestation_api_url
                .as_deref()
                .unwrap_or(DEFAULT_ATTESTATION_API),
        ) {
            Ok(url) => Some(url),
            Err(e) => {
                errors.push(format!("ATTESTATION_API_URL is not a valid URL: {e}"));
                None
            }
        };

        let worker_pool_size = self.worker_pool_size.unwrap_or(16);
        if worker_pool_size == 0 {
            errors.push("WORKER_POOL_SIZE must be positive".to_string());
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let secs = Duration::from_secs;
        Ok(RelayerConfig {
            supported_chains,
            initialize_interval: secs(self.initialize_interval_secs.unwrap_or(30)),
            finalize_interval: secs(self.finalize_interval_secs.unwrap_or(30)),
            bridge_interval: secs(self.bridge_interval_secs.unwrap_or(60)),
            redemption_vaa_interval: secs(self.redemption_vaa_interval_secs.unwrap_or(60)),
            redemption_submit_interval: secs(self.redemption_submit_interval_secs.unwrap_or(60)),
            past_scan_interval: secs(self.past_scan_interval_secs.unwrap_or(600)),
            retry_interval: secs(self.retry_interval_secs.unwrap_or(300)),
            worker_pool_size,
            attestation_api_url: attestation_api_url
                .unwrap_or_else(|| Url::parse(DEFAULT_ATTESTATION_API).expect("static url")),
            audit_log_path: self.audit_log_path.clone(),
        })
    }
}

/// Loads the process configuration plus one `ChainConfig` per supported
/// chain. Aggregates every validation diagnostic; a non-empty list aborts
/// startup.
pub fn load_from_env() -> Result<(RelayerConfig, Vec<ChainConfig>), ConfigError> {
    let raw: RawRelayerConfig = envy::prefixed("TBTC_").from_env()?;
    let mut errors = Vec::new();

    let relayer = match raw.validate() {
        Ok(relayer) => Some(relayer),
        Err(mut e) => {
            errors.append(&mut e);
            None
        }
    };

    let chain_names: Vec<String> = match &relayer {
        Some(r) if !r.supported_chains.is_empty() => r.supported_chains.clone(),
        _ => KNOWN_CHAINS.iter().map(|s| s.to_string()).collect(),
    };

    let mut chains = Vec::new();
    for name in &chain_names {
        let prefix = format!("TBTC_{}_", name.to_uppercase());
        let raw_chain: RawChainConfig = envy::prefixed(prefix).from_env()?;
        match raw_chain.validate(name) {
            Ok(chain) => chains.push(chain),
            Err(mut e) => errors.append(&mut e),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::Invalid(errors));
    }

    // relayer is Some here: a None relayer implies a non-empty error list.
    let relayer = relayer.ok_or_else(|| {
        ConfigError::Invalid(vec!["failed to assemble relayer configuration".to_string()])
    })?;
    Ok((relayer, chains))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tick_cadence() {
        let relayer = RawRelayerConfig::default().validate().expect("defaults valid");
        assert_eq!(relayer.initialize_interval, Duration::from_secs(30));
        assert_eq!(relayer.finalize_interval, Duration::from_secs(30));
        assert_eq!(relayer.bridge_interval, Duration::from_secs(60));
        assert_eq!(relayer.redemption_vaa_interval, Duration::from_secs(60));
        assert_eq!(relayer.past_scan_interval, Duration::from_secs(600));
        assert_eq!(relayer.retry_interval, Duration::from_secs(300));
        assert!(relayer.supported_chains.is_empty());
    }

    #[test]
    fn supported_chains_are_split_and_trimmed() {
        let raw = RawRelayerConfig {
            supported_chains: Some(" Base , Solana ,Sui".to_string()),
            ..Default::default()
        };
        let relayer = raw.validate().expect("valid");
        assert_eq!(relayer.supported_chains, vec!["Base", "Solana", "Sui"]);
    }

    #[test]
    fn zero_worker_pool_is_invalid() {
        let raw = RawRelayerConfig {
            worker_pool_size: Some(0),
            ..Default::default()
        };
        let errors = raw.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("WORKER_POOL_SIZE")));
    }
}
