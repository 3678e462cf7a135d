//! Periodic scheduler for the per-chain passes.
//!
//! Every (chain, pass-kind) pair gets its own loop task, which serializes
//! that pass per chain by construction; a tick whose predecessor is still
//! running simply does not exist. Passes for distinct chains run
//! concurrently, bounded by one shared worker-pool semaphore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use tbtc_relay_config::RelayerConfig;

use crate::audit::AuditLog;
use crate::errors::HandlerError;
use crate::handlers::{ChainHandler, HandlerRegistry};
use crate::utils::sleep_random;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Initialize,
    Finalize,
    Bridge,
    RedemptionVaa,
    RedemptionSubmit,
    PastScan,
}

impl PassKind {
    fn name(&self) -> &'static str {
        match self {
            PassKind::Initialize => "initialize",
            PassKind::Finalize => "finalize",
            PassKind::Bridge => "bridge",
            PassKind::RedemptionVaa => "redemption-vaa",
            PassKind::RedemptionSubmit => "redemption-submit",
            PassKind::PastScan => "past-scan",
        }
    }
}

pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    config: RelayerConfig,
    pool: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    audit: Arc<AuditLog>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        config: RelayerConfig,
        cancel: CancellationToken,
        audit: Arc<AuditLog>,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.worker_pool_size));
        Orchestrator {
            registry,
            config,
            pool,
            tracker: TaskTracker::new(),
            cancel,
            audit,
        }
    }

    /// Initializes every handler, then spawns its listener and pass loops.
    pub async fn start(&self) {
        info!(chains = self.registry.len(), "starting orchestrator");

        for handler in self.registry.iter() {
            if let Err(e) = handler.initialize().await {
                // A chain that cannot start still gets its loops: the next
                // ticks retry whatever startup left unfinished.
                error!(chain = handler.chain_name(), error = %e, "handler initialization failed");
            }

            self.spawn_listener(handler.clone());
            self.spawn_pass(handler.clone(), PassKind::Initialize, self.config.initialize_interval);
            self.spawn_pass(handler.clone(), PassKind::Finalize, self.config.finalize_interval);
            self.spawn_pass(handler.clone(), PassKind::Bridge, self.config.bridge_interval);
            if handler.redemption_enabled() {
                self.spawn_pass(
                    handler.clone(),
                    PassKind::RedemptionVaa,
                    self.config.redemption_vaa_interval,
                );
                self.spawn_pass(
                    handler.clone(),
                    PassKind::RedemptionSubmit,
                    self.config.redemption_submit_interval,
                );
            }
            if handler.supports_past_deposit_check() {
                self.spawn_pass(handler.clone(), PassKind::PastScan, self.config.past_scan_interval);
            }
        }
        self.tracker.close();
    }

    fn spawn_listener(&self, handler: Arc<dyn ChainHandler>) {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            if let Err(e) = handler.start_listening(cancel).await {
                error!(chain = handler.chain_name(), error = %e, "listener exited with error");
            }
        });
    }

    fn spawn_pass(&self, handler: Arc<dyn ChainHandler>, kind: PassKind, interval: Duration) {
        let cancel = self.cancel.clone();
        let pool = self.pool.clone();
        let audit = self.audit.clone();
        let config = self.config.clone();

        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep_random(interval) => {}
                }

                let permit = tokio::select! {
                    _ = cancel.cancelled() => return,
                    permit = pool.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let result = run_pass(handler.as_ref(), kind, &config).await;
                drop(permit);

                match result {
                    Ok(processed) => {
                        if processed > 0 {
                            audit.record(
                                handler.chain_name(),
                                "pass",
                                kind.name(),
                                &format!("picked up {processed} records"),
                            );
                        }
                        debug!(
                            chain = handler.chain_name(),
                            pass = kind.name(),
                            processed,
                            "pass finished"
                        );
                    }
                    Err(e) => {
                        warn!(
                            chain = handler.chain_name(),
                            pass = kind.name(),
                            error = %e,
                            "pass failed, retrying next tick"
                        );
                    }
                }
            }
        });
    }

    /// Cancels every loop and waits for in-flight passes to unwind.
    pub async fn shutdown(&self) {
        info!("shutting down orchestrator");
        self.cancel.cancel();
        self.tracker.wait().await;
        info!("orchestrator stopped");
    }
}

async fn run_pass(
    handler: &dyn ChainHandler,
    kind: PassKind,
    config: &RelayerConfig,
) -> Result<usize, HandlerError> {
    match kind {
        PassKind::Initialize => handler.process_initialize_deposits().await,
        PassKind::Finalize => handler.process_finalize_deposits().await,
        PassKind::Bridge => handler.process_bridge_deposits().await,
        PassKind::RedemptionVaa => handler.process_pending_redemptions().await,
        PassKind::RedemptionSubmit => handler.process_vaa_fetched_redemptions().await,
        PassKind::PastScan => {
            let latest = handler.latest_block().await?;
            let past_minutes = (config.past_scan_interval.as_secs() / 60).max(1) * 2;
            handler.check_for_past_deposits(past_minutes, latest).await?;
            Ok(0)
        }
    }
}
