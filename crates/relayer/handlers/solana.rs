use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use borsh::BorshSerialize;
use chrono::Duration as ChronoDuration;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tbtc_relay_common::types::{ChainType, Deposit, DepositId, DepositStatus, Network};
use tbtc_relay_config::SolanaChainConfig;
use tbtc_relay_rpc::clients::attestation::{
    AttestationClient, AttestationError, VAA_POLL_TIMEOUT, Vaa, VaaFetchOutcome,
    emitter_address_from_evm,
};
use tbtc_relay_rpc::clients::eth::EthClient;
use tbtc_relay_rpc::clients::solana::tx::{
    ASSOCIATED_TOKEN_PROGRAM_ID, AccountMeta, Instruction, Keypair, Pubkey, SYSTEM_PROGRAM_ID,
    SYSVAR_RENT_ID, TOKEN_PROGRAM_ID, Transaction,
};
use tbtc_relay_rpc::clients::solana::SolanaRpcClient;
use tbtc_relay_rpc::signer::Signer;
use tbtc_relay_storage::Store;

use crate::errors::HandlerError;
use crate::l1::{L1Bridge, L1Client, OnChainDepositState};
use crate::pipeline::{self, FinalizeBehavior, PipelineContext};

/// Wormhole core bridge deployments.
fn core_bridge_id(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth",
        Network::Testnet | Network::Devnet => "3u8hJUVTA4jH1wYAyUur7FFZVQ8H635K3tSHHF4ssjQ5",
    }
}

/// Instruction index of postVaa on the core bridge.
const POST_VAA_INSTRUCTION: u8 = 2;

#[derive(BorshSerialize)]
struct PostVaaData {
    version: u8,
    guardian_set_index: u32,
    timestamp: u32,
    nonce: u32,
    emitter_chain: u16,
    emitter_address: [u8; 32],
    sequence: u64,
    consistency_level: u8,
    payload: Vec<u8>,
}

/// Handler for the Solana destination chain.
///
/// Incoming deposits originate from the reveal endpoint, so there is no L2
/// listener. The L1 legs run through the shared pipeline; the bridging pass
/// posts the attestation to the core bridge and invokes the gateway's
/// `receive_tbtc`.
pub struct SolanaHandler {
    config: SolanaChainConfig,
    store: Store,
    l1: Arc<L1Client>,
    solana: SolanaRpcClient,
    keypair: Keypair,
    gateway_program: Pubkey,
    tbtc_program: Pubkey,
    core_bridge: Pubkey,
    attestation: Arc<AttestationClient>,
    retry_interval: ChronoDuration,
    cancel: CancellationToken,
}

impl SolanaHandler {
    pub fn new(
        config: SolanaChainConfig,
        store: Store,
        attestation: Arc<AttestationClient>,
        retry_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, HandlerError> {
        let l1_client = EthClient::new(config.common.l1_rpc.as_str())?;
        let signer = Signer::new(config.l1_private_key);

        let l1 = Arc::new(L1Client::new(
            l1_client,
            signer,
            config.common.l1_bitcoin_depositor_address,
            config.common.vault_address,
            config.common.l1_confirmations,
        ));

        let solana =
            SolanaRpcClient::new(config.common.l2_rpc.as_str(), config.solana_commitment)?;
        let keypair = Keypair::from_base58(&config.solana_private_key)?;
        let gateway_program = Pubkey::from_base58(&config.common.l2_wormhole_gateway_address)?;
        let tbtc_program = Pubkey::from_base58(&config.common.l2_bitcoin_depositor_address)?;
        let core_bridge = Pubkey::from_base58(core_bridge_id(config.common.network))?;

        Ok(SolanaHandler {
            config,
            store,
            l1,
            solana,
            keypair,
            gateway_program,
            tbtc_program,
            core_bridge,
            attestation,
            retry_interval: ChronoDuration::from_std(retry_interval)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
            cancel,
        })
    }

    fn pipeline_ctx(&self) -> PipelineContext<'_> {
        PipelineContext {
            store: &self.store,
            l1: self.l1.as_ref(),
            chain_name: &self.config.common.chain_name,
            retry_interval: self.retry_interval,
        }
    }

    fn posted_vaa_address(&self, vaa: &Vaa) -> Result<Pubkey, HandlerError> {
        let digest = vaa.digest();
        let (address, _) =
            Pubkey::find_program_address(&[b"PostedVAA", digest.as_bytes()], &self.core_bridge)?;
        Ok(address)
    }

    fn wrapped_tbtc_mint(&self) -> Result<Pubkey, HandlerError> {
        let (mint, _) = Pubkey::find_program_address(&[b"tbtc-mint"], &self.tbtc_program)?;
        Ok(mint)
    }

    fn post_vaa_instruction(&self, vaa: &Vaa) -> Result<Instruction, HandlerError> {
        let data = PostVaaData {
            version: vaa.version,
            guardian_set_index: vaa.guardian_set_index,
            timestamp: vaa.timestamp,
            nonce: vaa.nonce,
            emitter_chain: vaa.emitter_chain,
            emitter_address: vaa.emitter_address,
            sequence: vaa.sequence,
            consistency_level: vaa.consistency_level,
            payload: vaa.payload.clone(),
        };
        let mut instruction_data = vec![POST_VAA_INSTRUCTION];
        instruction_data.extend(
            borsh::to_vec(&data).map_err(|e| HandlerError::Custom(e.to_string()))?,
        );

        let (guardian_set, _) = Pubkey::find_program_address(
            &[b"GuardianSet", &vaa.guardian_set_index.to_be_bytes()],
            &self.core_bridge,
        )?;
        let (bridge_config, _) = Pubkey::find_program_address(&[b"Bridge"], &self.core_bridge)?;
        let posted_vaa = self.posted_vaa_address(vaa)?;

        Ok(Instruction {
            program_id: self.core_bridge,
            accounts: vec![
                AccountMeta::new_readonly(guardian_set, false),
                AccountMeta::new_readonly(bridge_config, false),
                AccountMeta::new(posted_vaa, false),
                AccountMeta::new(self.keypair.pubkey(), true),
                AccountMeta::new_readonly(Pubkey::from_base58(SYSVAR_RENT_ID)?, false),
                AccountMeta::new_readonly(Pubkey::from_base58(SYSTEM_PROGRAM_ID)?, false),
            ],
            data: instruction_data,
        })
    }

    fn create_ata_instruction(
        &self,
        wallet: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Instruction, HandlerError> {
        let ata = Pubkey::associated_token_address(wallet, mint)?;
        Ok(Instruction {
            program_id: Pubkey::from_base58(ASSOCIATED_TOKEN_PROGRAM_ID)?,
            accounts: vec![
                AccountMeta::new(self.keypair.pubkey(), true),
                AccountMeta::new(ata, false),
                AccountMeta::new_readonly(*wallet, false),
                AccountMeta::new_readonly(*mint, false),
                AccountMeta::new_readonly(Pubkey::from_base58(SYSTEM_PROGRAM_ID)?, false),
                AccountMeta::new_readonly(Pubkey::from_base58(TOKEN_PROGRAM_ID)?, false),
            ],
            data: Vec::new(),
        })
    }

    fn receive_tbtc_instruction(
        &self,
        vaa: &Vaa,
        recipient: &Pubkey,
    ) -> Result<Instruction, HandlerError> {
        // Anchor discriminator of the gateway's receive_tbtc entrypoint.
        let discriminator: [u8; 8] = {
            let digest = Sha256::digest(b"global:receive_tbtc");
            digest[..8].try_into().unwrap_or_default()
        };

        let (custodian, _) = Pubkey::find_program_address(&[b"redeemer"], &self.gateway_program)?;
        let posted_vaa = self.posted_vaa_address(vaa)?;
        let mint = self.wrapped_tbtc_mint()?;
        let recipient_token = Pubkey::associated_token_address(recipient, &mint)?;

        Ok(Instruction {
            program_id: self.gateway_program,
            accounts: vec![
                AccountMeta::new(self.keypair.pubkey(), true),
                AccountMeta::new(custodian, false),
                AccountMeta::new_readonly(posted_vaa, false),
                AccountMeta::new(mint, false),
                AccountMeta::new(recipient_token, false),
                AccountMeta::new_readonly(*recipient, false),
                AccountMeta::new_readonly(self.tbtc_program, false),
                AccountMeta::new_readonly(Pubkey::from_base58(TOKEN_PROGRAM_ID)?, false),
                AccountMeta::new_readonly(Pubkey::from_base58(ASSOCIATED_TOKEN_PROGRAM_ID)?, false),
                AccountMeta::new_readonly(Pubkey::from_base58(SYSTEM_PROGRAM_ID)?, false),
            ],
            data: discriminator.to_vec(),
        })
    }

    async fn send_instructions(
        &self,
        instructions: &[Instruction],
    ) -> Result<String, HandlerError> {
        let blockhash = self.solana.get_latest_blockhash().await?;
        let tx = Transaction::new_signed(instructions, &self.keypair, blockhash)?;
        let signature = self.solana.send_transaction(&tx).await?;
        self.solana.confirm_transaction(&signature).await?;
        Ok(signature)
    }

    /// Posts the attestation (skipped when the posted-VAA account already
    /// exists) and invokes `receive_tbtc`, creating the recipient token
    /// account when absent.
    async fn bridge_one(&self, mut deposit: Deposit) -> Result<(), HandlerError> {
        let Some(info) = deposit.attestation_info else {
            deposit.record_error("missing attestation info on AwaitingAttestation deposit");
            self.store.update_deposit(deposit).await?;
            return Ok(());
        };

        // Shutdown unwinds without touching the record; any other fetch
        // failure is recorded so the retry pacing applies.
        let fetch = self
            .attestation
            .fetch_vaa(
                self.config.common.network.l1_wormhole_chain_id(),
                emitter_address_from_evm(self.l1.depositor_address()),
                info.transfer_sequence,
                VAA_POLL_TIMEOUT,
                &self.cancel,
            )
            .await;
        let outcome = match fetch {
            Ok(outcome) => outcome,
            Err(AttestationError::Cancelled) => return Ok(()),
            Err(e) => VaaFetchOutcome::Failed(e.to_string()),
        };

        let vaa_bytes = match outcome {
            VaaFetchOutcome::Fetched(bytes) => bytes,
            VaaFetchOutcome::NotReady => {
                debug!(deposit = %deposit.id, "attestation not ready, retrying later");
                deposit.mark_activity();
                self.store.update_deposit(deposit).await?;
                return Ok(());
            }
            VaaFetchOutcome::Failed(reason) => {
                deposit.record_error(format!("attestation fetch failed: {reason}"));
                self.store.update_deposit(deposit).await?;
                return Ok(());
            }
        };

        let vaa = Vaa::parse(&vaa_bytes)
            .map_err(|e| HandlerError::FailedToDeserializeEvent(e.to_string()))?;
        let recipient = Pubkey(deposit.l1_output_event.l2_deposit_owner.0);
        let mint = self.wrapped_tbtc_mint()?;

        // Leg 1: post the VAA, once.
        let posted_vaa = self.posted_vaa_address(&vaa)?;
        if !self.solana.account_exists(&posted_vaa).await? {
            match self.send_instructions(&[self.post_vaa_instruction(&vaa)?]).await {
                Ok(signature) => {
                    info!(deposit = %deposit.id, signature, "attestation posted to core bridge");
                }
                Err(e) => {
                    deposit.record_error(format!("postVaa failed: {e}"));
                    self.store.update_deposit(deposit).await?;
                    return Ok(());
                }
            }
        }

        // Leg 2: receive_tbtc, creating the recipient token account first
        // when it does not exist yet.
        let mut instructions = Vec::new();
        let recipient_token = Pubkey::associated_token_address(&recipient, &mint)?;
        if !self.solana.account_exists(&recipient_token).await? {
            instructions.push(self.create_ata_instruction(&recipient, &mint)?);
        }
        instructions.push(self.receive_tbtc_instruction(&vaa, &recipient)?);

        match self.send_instructions(&instructions).await {
            Ok(signature) => {
                deposit.hashes.l2_bridge_tx = Some(signature.clone());
                deposit.set_status(DepositStatus::Bridged)?;
                deposit.clear_error();
                info!(
                    chain = %self.config.common.chain_name,
                    deposit = %deposit.id,
                    signature,
                    "deposit bridged"
                );
            }
            Err(e) => {
                deposit.record_error(format!("receive_tbtc failed: {e}"));
            }
        }
        self.store.update_deposit(deposit).await?;
        Ok(())
    }
}

#[async_trait]
impl super::ChainHandler for SolanaHandler {
    fn chain_name(&self) -> &str {
        &self.config.common.chain_name
    }

    fn chain_type(&self) -> ChainType {
        ChainType::Solana
    }

    async fn initialize(&self) -> Result<(), HandlerError> {
        let slot = self.solana.get_slot().await?;
        info!(
            chain = %self.config.common.chain_name,
            slot,
            payer = %self.keypair.pubkey(),
            "Solana handler initialized"
        );
        Ok(())
    }

    async fn start_listening(&self, _cancel: CancellationToken) -> Result<(), HandlerError> {
        // Solana deposits come in through the reveal endpoint; there is no
        // L2 subscription to run.
        info!(
            chain = %self.config.common.chain_name,
            "endpoint-originated deposits, no L2 listener"
        );
        Ok(())
    }

    async fn process_initialize_deposits(&self) -> Result<usize, HandlerError> {
        pipeline::process_initialize_deposits(&self.pipeline_ctx()).await
    }

    async fn process_finalize_deposits(&self) -> Result<usize, HandlerError> {
        pipeline::process_finalize_deposits(&self.pipeline_ctx(), FinalizeBehavior::default())
            .await
    }

    async fn process_bridge_deposits(&self) -> Result<usize, HandlerError> {
        let awaiting = self
            .store
            .get_deposits_by_status(
                DepositStatus::AwaitingAttestation,
                &self.config.common.chain_name,
            )
            .await?;
        let mut processed = 0;
        for deposit in awaiting {
            if !deposit.is_due(self.retry_interval) {
                continue;
            }
            processed += 1;
            if let Err(e) = self.bridge_one(deposit).await {
                error!(chain = %self.config.common.chain_name, error = %e, "bridge pass entry failed");
            }
        }
        Ok(processed)
    }

    async fn latest_block(&self) -> Result<u64, HandlerError> {
        Ok(self.solana.get_slot().await?)
    }

    fn supports_past_deposit_check(&self) -> bool {
        false
    }

    async fn check_for_past_deposits(
        &self,
        _past_minutes: u64,
        _latest_block: u64,
    ) -> Result<(), HandlerError> {
        warn!(
            chain = %self.config.common.chain_name,
            "past deposit checks are not supported on this chain"
        );
        Ok(())
    }

    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<OnChainDepositState, HandlerError> {
        Ok(self.l1.deposit_state(id.as_u256()).await?)
    }
}
