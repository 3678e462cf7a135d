mod cli;
mod initializers;

use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tbtc_relay_config::{ChainConfig, RelayerConfig};
use tbtc_relay_core::audit::AuditLog;
use tbtc_relay_core::handlers::{
    EvmHandler, HandlerRegistry, SolanaHandler, StarknetHandler, SuiHandler,
};
use tbtc_relay_core::orchestrator::Orchestrator;
use tbtc_relay_rpc::clients::attestation::AttestationClient;
use tbtc_relay_storage::{EngineType, Store};

#[tokio::main]
async fn main() {
    let cli = cli::CLI::parse();
    initializers::init_tracing(&cli.opts);

    let (mut relayer_config, chain_configs) = match tbtc_relay_config::load_from_env() {
        Ok(loaded) => loaded,
        Err(e) => {
            // Startup aborts with every diagnostic at once; nothing runs on
            // a partially valid configuration.
            error!("{e}");
            exit(1);
        }
    };
    if cli.opts.audit_log.is_some() {
        relayer_config.audit_log_path = cli.opts.audit_log.clone();
    }

    if chain_configs.is_empty() {
        error!("no chains configured, nothing to relay");
        exit(1);
    }

    let cancel = CancellationToken::new();
    match run(relayer_config, chain_configs, cancel.clone()).await {
        Ok(orchestrator) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, shutting down");
                }
                _ = cancel.cancelled() => {}
            }
            orchestrator.shutdown().await;
        }
        Err(reason) => {
            error!("{reason}");
            exit(1);
        }
    }
}

async fn run(
    relayer_config: RelayerConfig,
    chain_configs: Vec<ChainConfig>,
    cancel: CancellationToken,
) -> Result<Orchestrator, String> {
    let store = Store::new(EngineType::InMemory);
    let audit = Arc::new(
        AuditLog::new(relayer_config.audit_log_path.as_deref())
            .map_err(|e| format!("failed to open audit log: {e}"))?,
    );
    let attestation = Arc::new(
        AttestationClient::new(relayer_config.attestation_api_url.clone())
            .map_err(|e| format!("failed to build attestation client: {e}"))?,
    );

    let mut registry = HandlerRegistry::new();
    for chain in chain_configs {
        let chain_name = chain.chain_name().to_string();
        let result: Result<(), String> = match chain {
            ChainConfig::Evm(config) => EvmHandler::new(
                config,
                store.clone(),
                attestation.clone(),
                relayer_config.retry_interval,
                cancel.clone(),
            )
            .map(|handler| registry.insert(Arc::new(handler)))
            .map_err(|e| e.to_string()),
            ChainConfig::Solana(config) => SolanaHandler::new(
                config,
                store.clone(),
                attestation.clone(),
                relayer_config.retry_interval,
                cancel.clone(),
            )
            .map(|handler| registry.insert(Arc::new(handler)))
            .map_err(|e| e.to_string()),
            ChainConfig::Sui(config) => SuiHandler::new(
                config,
                store.clone(),
                attestation.clone(),
                relayer_config.retry_interval,
                cancel.clone(),
            )
            .map(|handler| registry.insert(Arc::new(handler)))
            .map_err(|e| e.to_string()),
            ChainConfig::Starknet(config) => {
                StarknetHandler::new(config, store.clone(), relayer_config.retry_interval)
                    .map(|handler| registry.insert(Arc::new(handler)))
                    .map_err(|e| e.to_string())
            }
        };
        result.map_err(|e| format!("failed to build handler for {chain_name}: {e}"))?;
        info!(chain = chain_name, "handler registered");
    }

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        relayer_config,
        cancel.clone(),
        audit,
    );
    orchestrator.start().await;
    Ok(orchestrator)
}
